mod rotator;
mod validator;

pub use rotator::ProxyRotator;
pub use validator::{Validation, validate_proxies};
