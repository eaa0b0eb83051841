pub mod catalog_services;
pub mod credential_services;
pub mod playlist_services;
pub mod proxy_services;
pub mod relay_services;

pub use catalog_services::DynCatalogService;
pub use credential_services::{CredentialManager, DynAuthClient, Session};
pub use proxy_services::ProxyServices;
