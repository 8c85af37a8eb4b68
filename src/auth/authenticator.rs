use super::error::Result;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::fmt::Write;

/// Presents a stored macaroon and its discharges to a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacaroonAuthenticator {
    pub macaroon: String,
    pub discharges: Vec<String>,
}

impl MacaroonAuthenticator {
    pub fn new(macaroon: String, discharges: Vec<String>) -> Self {
        Self {
            macaroon,
            discharges,
        }
    }

    /// `Macaroon root="…", discharge="…", …` with discharges in held order.
    pub fn authorization_header(&self) -> String {
        let mut header = format!(r#"Macaroon root="{}""#, self.macaroon);
        for discharge in &self.discharges {
            let _ = write!(header, r#", discharge="{discharge}""#);
        }
        header
    }

    /// Set the `Authorization` header on an outbound request.
    pub fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        let value = HeaderValue::from_str(&self.authorization_header())?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}
