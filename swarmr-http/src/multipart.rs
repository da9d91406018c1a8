use bytes::{BufMut as _, Bytes, BytesMut};

/// Builder for `multipart/form-data` request bodies (text fields and file
/// parts), as used by upload scenarios.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    buf: BytesMut,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    #[must_use]
    pub fn new() -> Self {
        // Browsers use "----WebKitFormBoundary<random>"; a v4 uuid gives us
        // the same collision resistance without carrying a RNG dependency.
        let boundary = format!("----SwarmrFormBoundary{}", uuid::Uuid::new_v4().simple());
        Self {
            boundary,
            buf: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's Content-Type header.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    #[must_use]
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.put_line(&format!(
            "Content-Disposition: form-data; name=\"{name}\""
        ));
        self.put_line("");
        self.put_line(value);
        self
    }

    #[must_use]
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part();
        self.put_line(&format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\""
        ));
        self.put_line(&format!("Content-Type: {content_type}"));
        self.put_line("");
        self.buf.put_slice(data);
        self.buf.put_slice(b"\r\n");
        self
    }

    /// Finish the body with the closing boundary.
    #[must_use]
    pub fn build(mut self) -> Bytes {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"--\r\n");
        self.buf.freeze()
    }

    fn open_part(&mut self) {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"\r\n");
    }

    fn put_line(&mut self, line: &str) {
        self.buf.put_slice(line.as_bytes());
        self.buf.put_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_fields_and_closing_boundary() {
        let form = MultipartForm::new()
            .file("file", "test.txt", "text/plain", b"hello upload")
            .text("uploadedBy", "user-1");
        let boundary = form.boundary().to_string();
        let body = form.build();
        let text = String::from_utf8(body.to_vec()).unwrap_or_else(|e| panic!("{e}"));

        assert!(text.contains(&format!("--{boundary}\r\n")));
        assert!(text.contains("Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\""));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("hello upload"));
        assert!(text.contains("name=\"uploadedBy\""));
        assert!(text.contains("user-1"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn boundaries_are_unique_per_form() {
        let a = MultipartForm::new();
        let b = MultipartForm::new();
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn content_type_names_the_boundary() {
        let form = MultipartForm::new();
        assert_eq!(
            form.content_type(),
            format!("multipart/form-data; boundary={}", form.boundary())
        );
    }
}
