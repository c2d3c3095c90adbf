pub mod connection;
pub mod detection;
pub mod quasi_identifier;
pub mod report;
pub mod sample;
pub mod scan;
pub mod schema;

pub use connection::*;
pub use detection::*;
pub use quasi_identifier::*;
pub use report::*;
pub use sample::*;
pub use scan::*;
pub use schema::*;
