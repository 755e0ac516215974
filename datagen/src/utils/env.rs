/// Identifier sent as `User-Agent` with every ingest request.
pub const fn network_service_identifier() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_identifier_is_name_and_version() {
        assert_eq!(
            network_service_identifier(),
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        );
    }
}
