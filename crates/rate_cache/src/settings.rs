//! Persisted shipping origin.

use std::sync::Arc;

use common::{Error, ShippingOrigin};
use tracing::warn;

use crate::store::SettingsStore;

pub const SHIPPING_ORIGIN: &str = "shipping_origin";

#[derive(Clone)]
pub struct OriginSettings {
    store: Arc<dyn SettingsStore>,
    default: ShippingOrigin,
}

impl OriginSettings {
    pub fn new(store: Arc<dyn SettingsStore>, default: ShippingOrigin) -> Self {
        Self { store, default }
    }

    /// The saved origin, or the default when none is saved or it cannot be read.
    pub async fn get(&self) -> ShippingOrigin {
        match self.store.get_setting(SHIPPING_ORIGIN).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(origin) => origin,
                Err(e) => {
                    warn!("Stored shipping origin is malformed, using default: {}", e);
                    self.default.clone()
                }
            },
            Ok(None) => self.default.clone(),
            Err(e) => {
                warn!("Shipping origin unavailable, using default: {}", e);
                self.default.clone()
            }
        }
    }

    pub async fn set(&self, origin: ShippingOrigin) -> Result<ShippingOrigin, Error> {
        if origin.city_id.trim().is_empty() {
            return Err(Error::Validation("cityId is required".into()));
        }
        let origin = ShippingOrigin {
            city_id: origin.city_id.trim().to_string(),
            subdistrict_id: origin
                .subdistrict_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            city_name: origin.city_name.trim().to_string(),
        };
        self.store
            .put_setting(SHIPPING_ORIGIN, serde_json::to_value(&origin)?)
            .await?;
        Ok(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::BrokenStore;

    #[tokio::test]
    async fn test_default_until_saved() {
        let settings = OriginSettings::new(Arc::new(MemoryStore::new()), ShippingOrigin::default());
        assert_eq!(settings.get().await.city_id, "152");

        let saved = settings
            .set(ShippingOrigin {
                city_id: " 444 ".into(),
                subdistrict_id: Some("".into()),
                city_name: "Surabaya".into(),
            })
            .await
            .expect("set");
        assert_eq!(saved.city_id, "444");
        assert_eq!(saved.subdistrict_id, None);
        assert_eq!(settings.get().await, saved);
    }

    #[tokio::test]
    async fn test_blank_city_rejected() {
        let settings = OriginSettings::new(Arc::new(MemoryStore::new()), ShippingOrigin::default());
        let result = settings
            .set(ShippingOrigin {
                city_id: "".into(),
                subdistrict_id: None,
                city_name: "Nowhere".into(),
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unreadable_store_returns_default() {
        let settings = OriginSettings::new(Arc::new(BrokenStore), ShippingOrigin::default());
        assert_eq!(settings.get().await, ShippingOrigin::default());
        assert!(settings.set(ShippingOrigin::default()).await.is_err());
    }
}
