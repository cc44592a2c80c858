// Domain-layer modules and shared errors/models
pub mod extractor {
    pub use crate::extractor::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
