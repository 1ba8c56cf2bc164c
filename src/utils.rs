use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.is_turn() { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_is_sixteen_hex_chars() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }

    #[test]
    fn scheme_added_by_server_type() {
        let mut cfg = ServerConfig::stun("a", "stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&cfg), "stun:stun.example.org:3478");

        cfg.r#type = "turn".into();
        assert_eq!(add_ice_url_scheme(&cfg), "turn:stun.example.org:3478");

        cfg.url = "turns:relay.example.org:5349".into();
        assert_eq!(add_ice_url_scheme(&cfg), "turns:relay.example.org:5349");
    }
}
