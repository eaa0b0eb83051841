mod proxy_context_extractor;

pub use proxy_context_extractor::*;
