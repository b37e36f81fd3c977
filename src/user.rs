use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type alias for a map of custom JSON attributes.
///
/// # Examples
/// ```
/// # use featuregate::Attributes;
/// let attributes = [
///     ("age".to_owned(), 30.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("tags".to_owned(), serde_json::json!(["beta", "staff"])),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, Value>;

/// Default unit id type. Any other id type is looked up in [`User::custom_ids`].
pub const USER_ID_TYPE: &str = "userID";

/// The subject ("unit") being evaluated.
///
/// # Examples
/// ```
/// # use featuregate::User;
/// let user = User::with_user_id("user-123")
///     .email("jane@example.com")
///     .custom_id("companyID", "acme")
///     .custom("plan", "pro");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Primary identifier, used for the `userID` id type.
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// IP address. Also used to derive the country when a country lookup is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Raw user agent string, parsed for OS and browser conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Country code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Locale (e.g., `en_US`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Version of the calling application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Custom attributes, searched after top-level fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: Attributes,
    /// Private attributes, searched last. Never included in outbound payloads.
    #[serde(default, skip_serializing)]
    pub private_attributes: Attributes,
    /// Identifiers for id types other than `userID` (e.g., `companyID`).
    #[serde(rename = "customIDs", default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_ids: HashMap<String, String>,
    /// Environment tags (e.g., `tier`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

impl User {
    /// Create a user with the given `userID`.
    pub fn with_user_id(user_id: impl Into<String>) -> User {
        User {
            user_id: Some(user_id.into()),
            ..User::default()
        }
    }

    /// Set email.
    pub fn email(mut self, email: impl Into<String>) -> User {
        self.email = Some(email.into());
        self
    }

    /// Set IP address.
    pub fn ip(mut self, ip: impl Into<String>) -> User {
        self.ip = Some(ip.into());
        self
    }

    /// Set user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> User {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set country.
    pub fn country(mut self, country: impl Into<String>) -> User {
        self.country = Some(country.into());
        self
    }

    /// Set locale.
    pub fn locale(mut self, locale: impl Into<String>) -> User {
        self.locale = Some(locale.into());
        self
    }

    /// Set app version.
    pub fn app_version(mut self, app_version: impl Into<String>) -> User {
        self.app_version = Some(app_version.into());
        self
    }

    /// Add a custom attribute.
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> User {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Add a private attribute.
    pub fn private_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> User {
        self.private_attributes.insert(key.into(), value.into());
        self
    }

    /// Add an identifier for a custom id type.
    pub fn custom_id(mut self, id_type: impl Into<String>, id: impl Into<String>) -> User {
        self.custom_ids.insert(id_type.into(), id.into());
        self
    }

    /// Add an environment tag.
    pub fn environment(mut self, key: impl Into<String>, value: impl Into<String>) -> User {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Resolve the unit id for `id_type`.
    ///
    /// Returns an empty string when the id is missing, so that hashing stays deterministic.
    pub fn unit_id(&self, id_type: &str) -> &str {
        if id_type.is_empty() || id_type.eq_ignore_ascii_case(USER_ID_TYPE) {
            return self.user_id.as_deref().unwrap_or("");
        }
        get_ignore_case(&self.custom_ids, id_type)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Look up a field by name: top-level fields first, then `custom`, then `private_attributes`.
    pub(crate) fn get_field(&self, field: &str) -> Option<Value> {
        if let Some(value) = self.top_level_field(field) {
            return Some(Value::String(value.to_owned()));
        }
        get_ignore_case(&self.custom, field)
            .or_else(|| get_ignore_case(&self.private_attributes, field))
            .filter(|value| !value.is_null())
            .cloned()
    }

    pub(crate) fn get_environment_field(&self, field: &str) -> Option<&str> {
        get_ignore_case(&self.environment, field).map(String::as_str)
    }

    fn top_level_field(&self, field: &str) -> Option<&str> {
        let value = match field.to_ascii_lowercase().as_str() {
            "userid" | "user_id" => &self.user_id,
            "email" => &self.email,
            "ip" | "ipaddress" | "ip_address" => &self.ip,
            "useragent" | "user_agent" => &self.user_agent,
            "country" => &self.country,
            "locale" => &self.locale,
            "appversion" | "app_version" => &self.app_version,
            _ => return None,
        };
        value.as_deref()
    }

    /// All identifiers of this user, `userID` first, then custom ids ordered by id type.
    pub(crate) fn all_ids(&self) -> Vec<&str> {
        let mut custom: Vec<(&String, &String)> = self.custom_ids.iter().collect();
        custom.sort();
        self.user_id
            .as_deref()
            .into_iter()
            .chain(custom.into_iter().map(|(_, id)| id.as_str()))
            .collect()
    }
}

/// Exact key match first, then ASCII case-insensitive match.
fn get_ignore_case<'a, V>(map: &'a HashMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::User;

    #[test]
    fn unit_id_falls_back_to_empty_string() {
        let user = User::with_user_id("u1").custom_id("CompanyID", "c1");
        assert_eq!(user.unit_id("userID"), "u1");
        assert_eq!(user.unit_id("userid"), "u1");
        assert_eq!(user.unit_id("companyID"), "c1");
        assert_eq!(user.unit_id("stableID"), "");
        assert_eq!(User::default().unit_id("userID"), "");
    }

    #[test]
    fn field_lookup_priority() {
        let user = User::with_user_id("u1")
            .email("a@b.com")
            .locale("en_US")
            .custom("email", "custom@b.com")
            .custom("Level", 3)
            .private_attribute("level", 5)
            .private_attribute("secret", "s");

        assert_eq!(user.get_field("email"), Some(json!("a@b.com")));
        assert_eq!(user.get_field("EMAIL"), Some(json!("a@b.com")));
        assert_eq!(user.get_field("locale"), Some(json!("en_US")));
        assert_eq!(user.get_field("level"), Some(json!(3)));
        assert_eq!(user.get_field("secret"), Some(json!("s")));
        assert_eq!(user.get_field("missing"), None);
    }

    #[test]
    fn parses_wire_format() {
        let user: User = serde_json::from_value(json!({
            "userID": "u1",
            "appVersion": "1.2.3",
            "customIDs": {"companyID": "c1"},
            "custom": {"tags": ["a", "b"]}
        }))
        .unwrap();

        assert_eq!(user.unit_id("companyID"), "c1");
        assert_eq!(user.get_field("app_version"), Some(json!("1.2.3")));
        assert_eq!(user.get_field("tags"), Some(json!(["a", "b"])));
    }

    #[test]
    fn private_attributes_are_not_serialized() {
        let user = User::with_user_id("u1").private_attribute("secret", "s");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json, json!({"userID": "u1"}));
    }
}
