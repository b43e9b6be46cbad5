pub mod context;
pub mod errors;
pub mod fanout;
pub mod matches;
pub mod notify;
pub mod saga;
pub mod service;

pub use context::{AppContext, AppContextBuilder};
pub use errors::AppError;
pub use service::ItemService;
