//! Marketing attribution tags from order metadata.

use serde_json::Value;

use super::payload::as_text;

const DEVICE_TYPE: &str = "_wc_order_attribution_device_type";
const SOURCE_TYPE: &str = "_wc_order_attribution_source_type";
const UTM_SOURCE: &str = "_wc_order_attribution_utm_source";
const UTM_MEDIUM: &str = "_wc_order_attribution_utm_medium";
const REFERRER: &str = "_wc_order_attribution_referrer";
const SESSION_REFERRER: &str = "_wc_order_attribution_session_referrer";

/// Attribution fields of one order. Absent tags stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub device_type: Option<String>,
    pub attribution_source: Option<String>,
    pub campaign_source: Option<String>,
    pub campaign_medium: Option<String>,
    pub referrer_url: Option<String>,
}

impl Attribution {
    /// Read tags from a `meta_data` list of `{key, value}` objects.
    ///
    /// The first non-empty value for each key wins. An explicit referrer
    /// beats the session referrer wherever either appears in the list.
    pub fn from_metadata(entries: &[Value]) -> Self {
        let mut attribution = Self::default();
        let mut session_referrer = None;

        for entry in entries {
            let Some(key) = entry.get("key").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = entry.get("value").and_then(as_text) else {
                continue;
            };

            let slot = match key {
                DEVICE_TYPE => &mut attribution.device_type,
                SOURCE_TYPE => &mut attribution.attribution_source,
                UTM_SOURCE => &mut attribution.campaign_source,
                UTM_MEDIUM => &mut attribution.campaign_medium,
                REFERRER => &mut attribution.referrer_url,
                SESSION_REFERRER => &mut session_referrer,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        if attribution.referrer_url.is_none() {
            attribution.referrer_url = session_referrer;
        }
        attribution
    }
}
