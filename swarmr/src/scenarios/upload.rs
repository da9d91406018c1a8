use swarmr_core::{BoxFuture, HttpRequest, Iteration, MultipartForm, Scenario, ScenarioError};

use super::think_time;

/// 16 KiB of deterministic filler standing in for a product image.
const UPLOAD_SIZE: usize = 16 * 1024;

/// Multipart media upload with the file part and the `uploadedBy` field the
/// media endpoint requires.
pub struct MediaUpload;

impl Scenario for MediaUpload {
    fn name(&self) -> &str {
        "media-upload"
    }

    fn run<'a>(&'a self, iter: &'a Iteration) -> BoxFuture<'a, Result<(), ScenarioError>> {
        Box::pin(async move {
            let pause = think_time(iter);
            let uploaded_by = iter.env().var_or("USER_ID", "load-tester").to_string();

            let payload: Vec<u8> = (0..UPLOAD_SIZE).map(|i| (i % 251) as u8).collect();
            let form = MultipartForm::new()
                .file("file", "load-test.bin", "application/octet-stream", &payload)
                .text("uploadedBy", &uploaded_by);
            let content_type = form.content_type();

            let req = HttpRequest::post(iter.env().url("/api/v1/media/upload")?, form.build())
                .header("content-type", content_type);

            let res = iter.http("media-upload", req).await;
            iter.check_status("upload status is 200 or 201", res.as_ref(), &[200, 201]);
            iter.think(pause).await;

            Ok(())
        })
    }
}
