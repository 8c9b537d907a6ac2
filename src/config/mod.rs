//! Configuration module

mod site;

pub use site::PrismicConfig;
pub use site::RevalidateConfig;
pub use site::SiteConfig;
