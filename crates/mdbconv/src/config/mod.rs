pub mod settings;

pub use settings::{load_dotenv, Settings};
