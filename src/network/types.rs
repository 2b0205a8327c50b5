/// A response body read within a byte limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// The `Content-Length` the server announced, if any.
    pub declared_length: Option<u64>,
    pub body: Vec<u8>,
}

impl FetchedResource {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Result of scanning a target page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Unique image URLs in first-seen order.
    Images { page_url: String, images: Vec<String> },
    /// Nothing usable on the page; carries the raw response for the caller.
    NoImages { status: u16, body: String },
}
