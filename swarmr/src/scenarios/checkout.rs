use serde_json::json;
use swarmr_core::{BoxFuture, HttpRequest, Iteration, Scenario, ScenarioError};

use super::think_time;

/// Product detail followed by order creation. The seeded PRODUCT_ID may not
/// exist on the target, so 404s are accepted on both calls and a 400 on the
/// order (validation) still passes the whitelist.
pub struct Checkout;

impl Scenario for Checkout {
    fn name(&self) -> &str {
        "checkout"
    }

    fn run<'a>(&'a self, iter: &'a Iteration) -> BoxFuture<'a, Result<(), ScenarioError>> {
        Box::pin(async move {
            let pause = think_time(iter);
            let product_id = iter.env().var_or("PRODUCT_ID", "1").to_string();
            let user_id = iter.env().var_or("USER_ID", "1").to_string();

            let res = iter
                .http(
                    "product-detail",
                    HttpRequest::get(iter.env().url(&format!("/api/products/{product_id}"))?),
                )
                .await;
            iter.check_status("product detail is 200 or 404", res.as_ref(), &[200, 404]);
            iter.think(pause).await;

            let payload = json!({
                "userId": user_id,
                "orderItems": [
                    { "productId": product_id, "quantity": 1 }
                ],
                "shippingAddress": "1 Main Street",
                "city": "Springfield",
                "zipCode": "12345",
                "phoneNumber": "+15550100",
            });
            let body = serde_json::to_vec(&payload)
                .map_err(|err| ScenarioError::new(format!("order payload: {err}")))?;

            let res = iter
                .http(
                    "create-order",
                    HttpRequest::post_json(iter.env().url("/api/orders")?, body),
                )
                .await;
            iter.check_status(
                "order status is 200, 201, 400 or 404",
                res.as_ref(),
                &[200, 201, 400, 404],
            );
            iter.think(pause).await;

            Ok(())
        })
    }
}
