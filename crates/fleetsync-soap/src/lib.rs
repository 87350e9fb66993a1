pub mod client;
pub mod envelope;
pub mod errors;
pub mod extract;
pub mod transport;

pub use client::SoapClient;
pub use errors::SoapError;
pub use extract::{extract_records, FieldValue, RawRecord};
pub use transport::{ReqwestTransport, SoapRequest, SoapResponse, SoapTransport};
