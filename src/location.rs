use std::{fmt::Display, str::FromStr};

use serde::{
    Deserialize,
    de::{
        MapAccess, SeqAccess, Visitor,
        value::{MapAccessDeserializer, SeqAccessDeserializer},
    },
};

use crate::error::FetchError;

/// Rendered in place of every field the lookup did not return.
pub const NOT_AVAILABLE: &str = "N/A";

/// A JSON leaf that may come back either as a string or as a number,
/// ipapi.co is not consistent about this for coordinates and postal codes.
/// Objects and arrays are kept as their JSON text rather than failing the
/// whole response.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}
impl Scalar {
    fn into_text(self) -> Option<String> {
        match self {
            Scalar::Text(s) if s.is_empty() => None,
            Scalar::Text(s) => Some(s),
            Scalar::Number(n) => Some(n.to_string()),
        }
    }
    fn non_empty(self) -> Option<Self> {
        match self {
            Scalar::Text(s) if s.is_empty() => None,
            other => Some(other),
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Number(n) => n.as_f64(),
        }
    }
}
impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Number(n) => Display::fmt(n, f),
        }
    }
}
impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = Scalar;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a string or a number")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Scalar::Text(v.to_owned()))
            }
            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Scalar::Text(v))
            }
            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Scalar::Text(v.to_string()))
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Scalar::Number(v.into()))
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Scalar::Number(v.into()))
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                serde_json::Number::from_f64(v)
                    .map(Scalar::Number)
                    .ok_or_else(|| E::custom("non-finite number"))
            }
            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let value = serde_json::Value::deserialize(MapAccessDeserializer::new(map))?;
                Ok(Scalar::Text(value.to_string()))
            }
            fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let value = serde_json::Value::deserialize(SeqAccessDeserializer::new(seq))?;
                Ok(Scalar::Text(value.to_string()))
            }
        }
        deserializer.deserialize_any(V)
    }
}

// structure: https://ipapi.co/api/#complete-location
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ApiResponse {
    pub ip: Option<Scalar>,
    pub country_name: Option<Scalar>,
    pub region: Option<Scalar>,
    pub city: Option<Scalar>,
    pub latitude: Option<Scalar>,
    pub longitude: Option<Scalar>,
    pub postal: Option<Scalar>,
    pub timezone: Option<Scalar>,
    pub org: Option<Scalar>,

    // only set on error envelopes, e.g. when rate limited
    pub reason: Option<Scalar>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocationRecord {
    pub ip_address: String,
    pub country_name: Option<String>,
    pub region_name: Option<String>,
    pub city_name: Option<String>,
    pub latitude: Option<Scalar>,
    pub longitude: Option<Scalar>,
    pub postal_code: Option<String>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
}
impl TryFrom<ApiResponse> for LocationRecord {
    type Error = FetchError;

    fn try_from(resp: ApiResponse) -> Result<Self, Self::Error> {
        let Some(ip_address) = resp.ip.and_then(Scalar::into_text) else {
            let message = match resp.reason {
                Some(reason) => format!("Invalid data received: {reason}"),
                None => "Invalid data received".to_string(),
            };
            return Err(FetchError::InvalidData(message));
        };
        Ok(Self {
            ip_address,
            country_name: resp.country_name.and_then(Scalar::into_text),
            region_name: resp.region.and_then(Scalar::into_text),
            city_name: resp.city.and_then(Scalar::into_text),
            latitude: resp.latitude.and_then(Scalar::non_empty),
            longitude: resp.longitude.and_then(Scalar::non_empty),
            postal_code: resp.postal.and_then(Scalar::into_text),
            timezone: resp.timezone.and_then(Scalar::into_text),
            isp: resp.org.and_then(Scalar::into_text),
        })
    }
}
impl LocationRecord {
    /// The value for every display slot, in display order. `precision` fixes
    /// the number of decimals for numeric coordinates, `None` renders them as
    /// received.
    pub fn slot_values(&self, precision: Option<usize>) -> Vec<(Slot, String)> {
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let coord = |v: &Option<Scalar>| match (v, precision) {
            (None, _) => NOT_AVAILABLE.to_string(),
            (Some(v), Some(precision)) => match v.as_f64() {
                Some(f) => format_coordinate(Some(f), precision),
                None => v.to_string(),
            },
            (Some(v), None) => v.to_string(),
        };
        vec![
            (Slot::IpAddress, self.ip_address.clone()),
            (Slot::CountryName, text(&self.country_name)),
            (Slot::RegionName, text(&self.region_name)),
            (Slot::CityName, text(&self.city_name)),
            (Slot::Latitude, coord(&self.latitude)),
            (Slot::Longitude, coord(&self.longitude)),
            (Slot::PostalCode, text(&self.postal_code)),
            (Slot::Timezone, text(&self.timezone)),
            (Slot::Isp, text(&self.isp)),
        ]
    }
}

pub fn format_coordinate(coord: Option<f64>, precision: usize) -> String {
    match coord {
        Some(coord) => format!("{coord:.precision$}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    IpAddress,
    CountryName,
    RegionName,
    CityName,
    Latitude,
    Longitude,
    PostalCode,
    Timezone,
    Isp,
}
impl Slot {
    pub const ALL: [Slot; 9] = [
        Slot::IpAddress,
        Slot::CountryName,
        Slot::RegionName,
        Slot::CityName,
        Slot::Latitude,
        Slot::Longitude,
        Slot::PostalCode,
        Slot::Timezone,
        Slot::Isp,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Slot::IpAddress => "ip_address",
            Slot::CountryName => "country_name",
            Slot::RegionName => "region_name",
            Slot::CityName => "city_name",
            Slot::Latitude => "latitude",
            Slot::Longitude => "longitude",
            Slot::PostalCode => "postal_code",
            Slot::Timezone => "timezone",
            Slot::Isp => "isp",
        }
    }
    pub fn label(&self) -> &'static str {
        match self {
            Slot::IpAddress => "IP Address",
            Slot::CountryName => "Country",
            Slot::RegionName => "Region",
            Slot::CityName => "City",
            Slot::Latitude => "Latitude",
            Slot::Longitude => "Longitude",
            Slot::PostalCode => "Postal Code",
            Slot::Timezone => "Timezone",
            Slot::Isp => "ISP",
        }
    }
}
impl FromStr for Slot {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::ALL
            .into_iter()
            .find(|slot| slot.id() == s)
            .ok_or_else(|| format!("unknown field `{s}`"))
    }
}
impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<LocationRecord, FetchError> {
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        LocationRecord::try_from(resp)
    }

    #[test]
    fn test_full_response_fills_every_slot() {
        let record = decode(
            r#"{"ip":"8.8.8.8","country_name":"US","city":"Mountain View","latitude":37.4,
                "longitude":-122.1,"postal":"94043","timezone":"America/Los_Angeles",
                "org":"Google LLC","asn":"AS15169"}"#,
        )
        .unwrap();
        let values = record.slot_values(None);
        let expected = [
            (Slot::IpAddress, "8.8.8.8"),
            (Slot::CountryName, "US"),
            (Slot::RegionName, "N/A"),
            (Slot::CityName, "Mountain View"),
            (Slot::Latitude, "37.4"),
            (Slot::Longitude, "-122.1"),
            (Slot::PostalCode, "94043"),
            (Slot::Timezone, "America/Los_Angeles"),
            (Slot::Isp, "Google LLC"),
        ];
        assert_eq!(values.len(), expected.len());
        for ((slot, value), (exp_slot, exp_value)) in values.iter().zip(expected) {
            assert_eq!(*slot, exp_slot);
            assert_eq!(value, exp_value);
        }
    }

    #[test]
    fn test_missing_null_and_empty_fields_render_sentinel() {
        let record = decode(r#"{"ip":"1.1.1.1","city":null,"region":"","latitude":""}"#).unwrap();
        for (slot, value) in record.slot_values(None) {
            if slot == Slot::IpAddress {
                assert_eq!(value, "1.1.1.1");
            } else {
                assert_eq!(value, NOT_AVAILABLE, "slot {slot}");
            }
        }
    }

    #[test]
    fn test_missing_ip_is_invalid_data() {
        for json in [r#"{}"#, r#"{"ip":null}"#, r#"{"ip":""}"#, r#"{"city":"Berlin"}"#] {
            let err = decode(json).unwrap_err();
            assert!(matches!(err, FetchError::InvalidData(_)), "{json}");
            assert_eq!(err.status().as_str(), "parsererror");
        }
    }

    #[test]
    fn test_whitespace_values_are_kept() {
        let record = decode(r#"{"ip":" ","postal":"  "}"#).unwrap();
        assert_eq!(record.ip_address, " ");
        assert_eq!(record.postal_code.as_deref(), Some("  "));
    }

    #[test]
    fn test_unexpected_shapes_do_not_fail_the_response() {
        let record = decode(
            r#"{"ip":"1.2.3.4","org":{"name":"Google"},"timezone":["UTC"],"city":true}"#,
        )
        .unwrap();
        assert_eq!(record.isp.as_deref(), Some(r#"{"name":"Google"}"#));
        assert_eq!(record.timezone.as_deref(), Some(r#"["UTC"]"#));
        assert_eq!(record.city_name.as_deref(), Some("true"));
    }

    #[test]
    fn test_string_coordinates_render_as_received() {
        let record = decode(r#"{"ip":"1.2.3.4","latitude":"37.40","longitude":"unknown"}"#).unwrap();
        let values = record.slot_values(None);
        assert_eq!(values[4], (Slot::Latitude, "37.40".to_string()));
        assert_eq!(values[5], (Slot::Longitude, "unknown".to_string()));

        let values = record.slot_values(Some(3));
        assert_eq!(values[4], (Slot::Latitude, "37.400".to_string()));
        assert_eq!(values[5], (Slot::Longitude, "unknown".to_string()));
    }

    #[test]
    fn test_error_envelope_reason_is_kept() {
        let err = decode(r#"{"error":true,"reason":"RateLimited"}"#).unwrap_err();
        assert!(err.message().contains("RateLimited"));
    }

    #[test]
    fn test_numbers_and_strings_are_interchangeable() {
        let record = decode(r#"{"ip":"1.2.3.4","postal":10115,"latitude":"52.52"}"#).unwrap();
        assert_eq!(record.postal_code.as_deref(), Some("10115"));
        assert_eq!(record.latitude.and_then(|l| l.as_f64()), Some(52.52));
    }

    #[test]
    fn test_coordinate_precision() {
        assert_eq!(format_coordinate(Some(37.4), 4), "37.4000");
        assert_eq!(format_coordinate(Some(-122.08385), 2), "-122.08");
        assert_eq!(format_coordinate(None, 4), NOT_AVAILABLE);

        let record = decode(r#"{"ip":"1.2.3.4","latitude":37.4}"#).unwrap();
        let values = record.slot_values(Some(2));
        assert_eq!(values[4], (Slot::Latitude, "37.40".to_string()));
        assert_eq!(values[5], (Slot::Longitude, NOT_AVAILABLE.to_string()));
    }

    #[test]
    fn test_slot_ids_parse() {
        for slot in Slot::ALL {
            assert_eq!(slot.id().parse::<Slot>().unwrap(), slot);
        }
        assert!("zip".parse::<Slot>().is_err());
    }
}
