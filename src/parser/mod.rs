pub mod errors;
pub mod resolver;
pub mod url_list;

pub use errors::ParseError;
pub use resolver::LinkResolver;
pub use url_list::{filename_from_url, load_url_list, parse_selection, parse_url_list};
