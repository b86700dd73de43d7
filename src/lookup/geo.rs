use std::net::IpAddr;

use ipnetwork::IpNetwork;
use log::debug;

use super::GeoLookup;
use crate::configuration::types::{GeoConfig, GeoNetworkConfig};
use crate::ecs::{Geo, GeoPoint};
use crate::error_handling::types::{ConfigError, LookupError};

/// Static CIDR to location table; the most specific network wins.
#[derive(Debug, Clone, Default)]
pub struct GeoTable {
    entries: Vec<(IpNetwork, Geo)>,
}

impl GeoTable {
    pub fn from_config(config: &GeoConfig) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(config.networks.len());
        for network in &config.networks {
            let cidr = network
                .cidr
                .parse::<IpNetwork>()
                .map_err(|e| ConfigError::BadCidr(format!("{}: {}", network.cidr, e)))?;
            entries.push((cidr, to_geo(network)));
        }
        debug!("Geo table loaded with {} networks", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_geo(network: &GeoNetworkConfig) -> Geo {
    let location = match (network.lat, network.lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
        _ => None,
    };
    Geo {
        city_name: network.city_name.clone(),
        country_name: network.country_name.clone(),
        country_iso_code: network.country_iso_code.clone(),
        continent_name: network.continent_name.clone(),
        continent_code: network.continent_code.clone(),
        location,
        postal_code: network.postal_code.clone(),
        timezone: network.timezone.clone(),
    }
}

impl GeoLookup for GeoTable {
    fn lookup(&self, ip: IpAddr) -> Result<Geo, LookupError> {
        self.entries
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, geo)| geo.clone())
            .ok_or(LookupError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(cidr: &str, city: &str) -> GeoNetworkConfig {
        GeoNetworkConfig {
            cidr: cidr.into(),
            city_name: Some(city.into()),
            country_iso_code: Some("ID".into()),
            lat: Some(-6.2),
            lon: Some(106.8),
            ..Default::default()
        }
    }

    #[test]
    fn test_most_specific_network_wins() {
        let table = GeoTable::from_config(&GeoConfig {
            networks: vec![
                network("203.0.113.0/24", "Jakarta"),
                network("203.0.113.128/25", "Bandung"),
                network("2001:db8::/32", "Surabaya"),
            ],
        })
        .unwrap();
        assert_eq!(table.len(), 3);

        let geo = table.lookup("203.0.113.9".parse().unwrap()).unwrap();
        assert_eq!(geo.city_name.as_deref(), Some("Jakarta"));
        assert_eq!(geo.location, Some(GeoPoint { lat: -6.2, lon: 106.8 }));

        let geo = table.lookup("203.0.113.200".parse().unwrap()).unwrap();
        assert_eq!(geo.city_name.as_deref(), Some("Bandung"));

        let geo = table.lookup("2001:db8::1".parse().unwrap()).unwrap();
        assert_eq!(geo.city_name.as_deref(), Some("Surabaya"));
    }

    #[test]
    fn test_unknown_address_not_found() {
        let table = GeoTable::from_config(&GeoConfig {
            networks: vec![network("10.0.0.0/8", "Intranet")],
        })
        .unwrap();
        assert!(matches!(
            table.lookup("192.0.2.1".parse().unwrap()),
            Err(LookupError::NotFound)
        ));
        assert!(GeoTable::default().is_empty());
    }

    #[test]
    fn test_bad_cidr_rejected() {
        let result = GeoTable::from_config(&GeoConfig {
            networks: vec![network("10.0.0.0/40", "x")],
        });
        assert!(matches!(result, Err(ConfigError::BadCidr(_))));
    }
}
