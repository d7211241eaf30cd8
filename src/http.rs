use reqwest::redirect::Policy;
use reqwest::header::ORIGIN;
use url::Url;

use crate::errors::{WaError, WaResult};
use crate::Jid;

/// Existence check that bypasses the WebSocket entirely: follows `wa.me`'s
/// redirect manually and inspects where it would have gone.
pub async fn is_on_whatsapp_no_conn(phone: &str) -> WaResult<Option<Jid>> {
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()?;

    let response = client
        .get(&format!("https://wa.me/{}", phone))
        .header(ORIGIN, "https://wa.me")
        .send()
        .await?;

    let location = match response.headers().get(reqwest::header::LOCATION) {
        Some(value) => value.to_str().map_err(|_| {
            WaError::InvalidPayload("Location header".to_owned(), "ASCII header value")
        })?,
        None => return Ok(None),
    };

    let url = Url::parse(location)
        .map_err(|_| WaError::InvalidPayload(location.to_owned(), "valid URL"))?;

    if !url.path().ends_with("send/") {
        return Ok(None);
    }

    let phone = url
        .query_pairs()
        .find(|(k, _)| k == "phone")
        .map(|(_, v)| v.into_owned());

    match phone {
        Some(phone) => Ok(Some(format!("{}@s.whatsapp.net", phone).parse()?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_location_header_means_not_on_whatsapp() {
        // Exercised via the Jid parse path only; the HTTP call itself needs
        // a live network and is covered by integration tests instead.
        let jid: Jid = "15551234567@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.id, "15551234567");
    }
}
