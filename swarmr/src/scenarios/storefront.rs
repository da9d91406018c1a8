use swarmr_core::{BoxFuture, HttpRequest, Iteration, Scenario, ScenarioError};

use super::think_time;

/// Catalog browsing: product list, active shops page, then the reviews of
/// the seeded product (`PRODUCT_ID`). Reviews legitimately 404 for products
/// nobody reviewed, so both 200 and 404 pass the check.
pub struct StorefrontBrowse;

impl Scenario for StorefrontBrowse {
    fn name(&self) -> &str {
        "storefront-browse"
    }

    fn run<'a>(&'a self, iter: &'a Iteration) -> BoxFuture<'a, Result<(), ScenarioError>> {
        Box::pin(async move {
            let pause = think_time(iter);

            let res = iter
                .http("products", HttpRequest::get(iter.env().url("/api/products")?))
                .await;
            iter.check_status("products status is 200", res.as_ref(), &[200]);
            iter.think(pause).await;

            let res = iter
                .http(
                    "active-shops",
                    HttpRequest::get(iter.env().url("/api/v1/shops/active?page=0&size=20")?),
                )
                .await;
            iter.check_status("active shops status is 200", res.as_ref(), &[200]);
            iter.think(pause).await;

            let product_id = iter.env().var_or("PRODUCT_ID", "1").to_string();
            let res = iter
                .http(
                    "product-reviews",
                    HttpRequest::get(
                        iter.env()
                            .url(&format!("/api/v1/reviews/product/{product_id}"))?,
                    ),
                )
                .await;
            iter.check_status("reviews status is 200 or 404", res.as_ref(), &[200, 404]);
            iter.think(pause).await;

            Ok(())
        })
    }
}
