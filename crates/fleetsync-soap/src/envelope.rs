//! SOAP 1.1 envelope construction for the legacy web service call
//! convention: a header slot for the session token and a body element named
//! after the method, with the parameter map flattened as sibling elements.

pub const SERVICE_NAMESPACE: &str = "urn:WS_Progilift";

/// Escapes the markup characters the service chokes on. Parameter values are
/// plain text; anything richer is the caller's bug.
pub fn escape_value(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn soap_action(method: &str) -> String {
    format!("\"{SERVICE_NAMESPACE}/{method}\"")
}

pub fn build_envelope(method: &str, params: &[(&str, String)], token: Option<&str>) -> String {
    let header = match token {
        Some(token) => format!(
            "<ws:WSID xsi:type=\"xsd:hexBinary\" soap:mustUnderstand=\"1\">{token}</ws:WSID>"
        ),
        None => String::new(),
    };

    let mut body = String::new();
    for (key, value) in params {
        body.push_str(&format!("<ws:{key}>{}</ws:{key}>", escape_value(value)));
    }

    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ws=\"{ns}\" ",
            "xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" ",
            "xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">",
            "<soap:Header>{header}</soap:Header>",
            "<soap:Body><ws:{method}>{body}</ws:{method}></soap:Body>",
            "</soap:Envelope>"
        ),
        ns = SERVICE_NAMESPACE,
        header = header,
        method = method,
        body = body,
    )
}
