//! Domain types shared across the service.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::Error;

/// The rate API mixes numeric and string ids; everything is exposed as a string.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// ── Location hierarchy ────────────────────────────────────────────────

/// Top level of the administrative tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// City or regency; belongs to exactly one province.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub zip_code: String,
    #[serde(default, deserialize_with = "id_string")]
    pub province_id: String,
}

/// District (kecamatan); belongs to exactly one city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct District {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub zip_code: String,
    #[serde(default, deserialize_with = "id_string")]
    pub city_id: String,
}

/// Subdistrict (kelurahan); belongs to exactly one district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdistrict {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub zip_code: String,
    #[serde(default, deserialize_with = "id_string")]
    pub district_id: String,
}

/// A free-text destination search hit, carrying the full hierarchy.
///
/// `id` is the subdistrict-level destination id used for cost lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DestinationMatch {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub province_name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub province_id: String,
    #[serde(default)]
    pub city_name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub city_id: String,
    #[serde(default)]
    pub district_name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub district_id: String,
    #[serde(default)]
    pub subdistrict_name: String,
    #[serde(default, deserialize_with = "id_string")]
    pub subdistrict_id: String,
    #[serde(default, deserialize_with = "id_string")]
    pub zip_code: String,
}

impl DestinationMatch {
    /// Fill derived fields the upstream leaves out.
    pub fn normalized(mut self) -> Self {
        if self.subdistrict_id.is_empty() {
            self.subdistrict_id = self.id.clone();
        }
        if self.label.is_empty() {
            self.label = [
                self.subdistrict_name.as_str(),
                self.district_name.as_str(),
                self.city_name.as_str(),
                self.province_name.as_str(),
                self.zip_code.as_str(),
            ]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        }
        self
    }
}

// ── Shipping cost ─────────────────────────────────────────────────────

/// Which end of the price range the upstream should quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Lowest,
    Highest,
}

impl PriceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceTier::Lowest => "lowest",
            PriceTier::Highest => "highest",
        }
    }
}

/// Every input that affects a shipping-cost quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuery {
    pub origin: String,
    pub destination: String,
    /// Parcel weight in grams.
    pub weight: u32,
    /// One courier code or several joined with `:` (e.g. `jne:sicepat`).
    pub courier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdistrict_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, rename = "useDistrict")]
    pub use_district: bool,
}

impl CostQuery {
    pub fn new(origin: &str, destination: &str, weight: u32, courier: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            weight,
            courier: courier.to_string(),
            price: None,
            subdistrict_id: None,
            zip_code: None,
            use_district: false,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let mut missing = Vec::new();
        if self.origin.trim().is_empty() {
            missing.push("origin");
        }
        if self.destination.trim().is_empty() {
            missing.push("destination");
        }
        if self.weight == 0 {
            missing.push("weight");
        }
        if self.courier.trim().is_empty() {
            missing.push("courier");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )))
        }
    }
}

/// One priced variant of a courier service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostDetail {
    pub value: i64,
    #[serde(default)]
    pub etd: String,
    #[serde(default)]
    pub note: String,
}

/// A courier service (e.g. JNE "REG") and its quoted prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub service: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cost: Vec<CostDetail>,
}

/// All quoted services for one courier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostOption {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub costs: Vec<ServiceCost>,
}

// ── Settings ──────────────────────────────────────────────────────────

/// Admin-selected shipping point used as the origin of cost lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOrigin {
    #[serde(deserialize_with = "id_string")]
    pub city_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdistrict_id: Option<String>,
    #[serde(default)]
    pub city_name: String,
}

impl Default for ShippingOrigin {
    fn default() -> Self {
        Self {
            city_id: "152".into(),
            subdistrict_id: None,
            city_name: "Jakarta Timur, DKI Jakarta".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_become_strings() {
        let city: City =
            serde_json::from_str(r#"{"id": 151, "name": "Jakarta Barat", "zip_code": "11220"}"#)
                .expect("city should deserialize");
        assert_eq!(city.id, "151");
        assert_eq!(city.zip_code, "11220");
        assert!(city.province_id.is_empty());
    }

    #[test]
    fn test_destination_match_normalization() {
        let raw = r#"{
            "id": 17674,
            "label": "",
            "province_name": "Bali",
            "province_id": 1,
            "city_name": "Badung",
            "city_id": 1,
            "district_name": "Kuta",
            "district_id": 2,
            "subdistrict_name": "Kuta",
            "zip_code": "80361"
        }"#;
        let hit: DestinationMatch = serde_json::from_str(raw).expect("match should deserialize");
        let hit = hit.normalized();

        assert_eq!(hit.subdistrict_id, "17674");
        assert_eq!(hit.district_id, "2");
        assert_eq!(hit.label, "Kuta, Kuta, Badung, Bali, 80361");
    }

    #[test]
    fn test_cost_query_reports_every_missing_field() {
        let query = CostQuery::new("", "151", 0, "jne");
        let err = query.validate().expect_err("should be rejected");
        let msg = err.to_string();
        assert!(msg.contains("origin"));
        assert!(msg.contains("weight"));
        assert!(!msg.contains("courier"));
    }

    #[test]
    fn test_shipping_origin_wire_format() {
        let origin: ShippingOrigin =
            serde_json::from_str(r#"{"cityId": 444, "cityName": "Surabaya"}"#)
                .expect("origin should deserialize");
        assert_eq!(origin.city_id, "444");
        assert_eq!(origin.subdistrict_id, None);

        let json = serde_json::to_value(&origin).expect("serialize");
        assert_eq!(json["cityId"], "444");
        assert!(json.get("subdistrictId").is_none());
    }
}
