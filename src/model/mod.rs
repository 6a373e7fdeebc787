mod policy;
mod record;
mod schema;
mod value;

pub use policy::*;
pub use record::*;
pub use schema::*;
pub use value::*;
