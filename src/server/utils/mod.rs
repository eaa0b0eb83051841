pub mod compression_utils;
pub mod manifest_utils;
pub mod pointer_utils;
pub mod signature_utils;
