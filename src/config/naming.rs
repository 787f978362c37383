use super::ConfigError;

/// One component of a container identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameComponent {
    /// `tn` — the device tag name
    TagName,
    /// `sn` — the device serial number
    Serial,
    /// `tt` — the OMF tag type string
    TagType,
}

/// The container-identifier scheme: an ordered list of name components
/// joined with `-`. Parsed once at startup from a dash-separated option
/// string; `default` means `tn-sn-tt`, which keeps containers unique across
/// devices posting to the same server under the same type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    components: Vec<NameComponent>,
}

const DELIMITER: char = '-';

impl NamingScheme {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("default") {
            return Ok(Self {
                components: vec![
                    NameComponent::TagName,
                    NameComponent::Serial,
                    NameComponent::TagType,
                ],
            });
        }

        let mut components = Vec::new();
        for token in raw.split(DELIMITER) {
            let component = if token.eq_ignore_ascii_case("tn") {
                NameComponent::TagName
            } else if token.eq_ignore_ascii_case("sn") {
                NameComponent::Serial
            } else if token.eq_ignore_ascii_case("tt") {
                NameComponent::TagType
            } else {
                return Err(ConfigError::InvalidConfig(format!(
                    "unknown naming scheme option \"{token}\"; valid options are \
                     tn (tag name), sn (serial number), tt (tag type), separated by \"{DELIMITER}\""
                )));
            };
            if components.contains(&component) {
                return Err(ConfigError::InvalidConfig(format!(
                    "naming scheme option \"{token}\" given more than once"
                )));
            }
            components.push(component);
        }

        // A scheme with no tag name cannot distinguish tags from each other.
        if !components.contains(&NameComponent::TagName) {
            return Err(ConfigError::InvalidConfig(
                "naming scheme must include the tn (tag name) option".to_string(),
            ));
        }

        Ok(Self { components })
    }

    /// Compose the container id for one tag from the configured components.
    pub fn container_id(&self, tag_name: &str, serial: &str, tag_type: &str) -> String {
        let mut id = String::new();
        for component in &self.components {
            if !id.is_empty() {
                id.push(DELIMITER);
            }
            match component {
                NameComponent::TagName => id.push_str(tag_name),
                NameComponent::Serial => id.push_str(serial),
                NameComponent::TagType => id.push_str(tag_type),
            }
        }
        id
    }
}
