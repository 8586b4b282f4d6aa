pub mod scanner;

pub use http_test::{HttpTestHandles, HttpTestRequest};
pub use scanner::{ScannerHandles, ScannerRequest};
