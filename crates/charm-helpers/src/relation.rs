//! Typed view of the settings a remote unit published on a relation.
use std::{cmp::Ordering, collections::BTreeMap};

/// The settings published by one remote unit on one relation.
///
/// The keys the charms in this repository care about are lifted into fields, everything else is
/// kept verbatim in [`RelationUnit::extra`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationUnit {
    /// The relation the unit was seen on, e.g. `reverseproxy:3`.
    pub relation_id: Option<String>,

    /// The remote unit, e.g. `wordpress/0`.
    pub unit: Option<String>,

    pub private_address: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<String>,

    /// Name of the service the unit wants to be added to.
    pub service_name: Option<String>,

    /// Whitespace separated list of service aliases.
    pub sitenames: Option<String>,

    /// Explicit name for the server entry, instead of deriving one from the unit.
    pub server_name: Option<String>,

    /// Whitespace separated server options overriding the service's defaults.
    pub server_options: Option<String>,

    /// YAML serialized list of complete service definitions.
    pub services: Option<String>,

    pub extra: BTreeMap<String, String>,
}

impl RelationUnit {
    /// Builds the record from the raw settings returned by `relation-get`.
    pub fn from_settings(
        relation_id: impl Into<String>,
        unit: impl Into<String>,
        mut settings: BTreeMap<String, String>,
    ) -> Self {
        Self {
            relation_id: Some(relation_id.into()),
            unit: Some(unit.into()),
            private_address: settings.remove("private-address"),
            hostname: settings.remove("hostname"),
            port: settings.remove("port"),
            service_name: settings.remove("service_name"),
            sitenames: settings.remove("sitenames"),
            server_name: settings.remove("server_name"),
            server_options: settings.remove("server_options"),
            services: settings.remove("services"),
            extra: settings,
        }
    }

    /// The application part of the unit name (`wordpress` for `wordpress/0`).
    pub fn application(&self) -> Option<&str> {
        self.unit
            .as_deref()
            .map(|unit| unit.split_once('/').map_or(unit, |(application, _)| application))
    }

    /// How the unit is referred to in log messages.
    pub fn display_name(&self) -> &str {
        self.unit
            .as_deref()
            .or(self.private_address.as_deref())
            .unwrap_or("unknown")
    }

    /// Aliases from the `sitenames` setting, in the order they were published.
    pub fn sitenames(&self) -> impl Iterator<Item = &str> {
        self.sitenames.iter().flat_map(|names| names.split_whitespace())
    }
}

/// Orders relation ids (`reverseproxy:10` after `reverseproxy:9`) numerically by their suffix.
pub fn compare_relation_ids(a: &str, b: &str) -> Ordering {
    numeric_suffix_key(a, ':').cmp(&numeric_suffix_key(b, ':'))
}

/// Orders unit names (`app/10` after `app/9`) numerically by their suffix.
pub fn compare_units(a: &str, b: &str) -> Ordering {
    numeric_suffix_key(a, '/').cmp(&numeric_suffix_key(b, '/'))
}

fn numeric_suffix_key(value: &str, separator: char) -> (&str, Option<u64>, &str) {
    match value.rsplit_once(separator) {
        Some((prefix, suffix)) => (prefix, suffix.parse().ok(), suffix),
        None => (value, None, ""),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn known_settings_are_lifted_into_fields() {
        let settings = BTreeMap::from([
            ("private-address".to_owned(), "1.2.3.4".to_owned()),
            ("port".to_owned(), "4242".to_owned()),
            ("sitenames".to_owned(), "foo_srv bar_srv".to_owned()),
            ("something-else".to_owned(), "kept".to_owned()),
        ]);

        let unit = RelationUnit::from_settings("reverseproxy:1", "foo/0", settings);

        assert_eq!(unit.private_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(unit.port.as_deref(), Some("4242"));
        assert_eq!(unit.application(), Some("foo"));
        assert_eq!(unit.sitenames().collect::<Vec<_>>(), ["foo_srv", "bar_srv"]);
        assert_eq!(
            unit.extra,
            BTreeMap::from([("something-else".to_owned(), "kept".to_owned())])
        );
    }

    #[test]
    fn display_name_falls_back_to_address() {
        let unit = RelationUnit {
            private_address: Some("10.0.1.2".to_owned()),
            ..RelationUnit::default()
        };
        assert_eq!(unit.display_name(), "10.0.1.2");
        assert_eq!(RelationUnit::default().display_name(), "unknown");
    }

    #[rstest]
    #[case("reverseproxy:2", "reverseproxy:10", Ordering::Less)]
    #[case("reverseproxy:3", "reverseproxy:3", Ordering::Equal)]
    #[case("a:1", "b:0", Ordering::Less)]
    fn relation_ids_sort_numerically(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_relation_ids(a, b), expected);
    }

    #[rstest]
    #[case("foo/9", "foo/10", Ordering::Less)]
    #[case("bar/1", "foo/0", Ordering::Less)]
    fn units_sort_numerically(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_units(a, b), expected);
    }
}
