//! Property Model: the typed, named, vectorized state container shared by
//! every message on the wire.
//!
//! A `Property` belongs to exactly one device, carries one of five element
//! kinds, and is only ever mutated atomically: an update either applies all
//! of its element changes or none of them.

pub mod blob;
pub mod format;

pub use self::blob::{Blob, BlobData, BlobHandle};
pub use self::format::{parse_number, NumberFormat};

use serde::{Deserialize, Serialize};

use crate::core::{
    Error, Permission, PropertyKind, PropertyState, Result, SwitchRule, SwitchState, Timestamp,
};

/// One member of a Number vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberElement {
    pub name: String,
    pub label: String,
    /// Display format, printf-style or sexagesimal
    pub format: NumberFormat,
    pub min: f64,
    pub max: f64,
    /// Allowed increment; 0 means unconstrained
    pub step: f64,
    pub value: f64,
}

/// One member of a Text vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub name: String,
    pub label: String,
    pub value: String,
}

/// One member of a Switch vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchElement {
    pub name: String,
    pub label: String,
    pub state: SwitchState,
}

/// One member of a Light vector; read-only by definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightElement {
    pub name: String,
    pub label: String,
    pub state: PropertyState,
}

/// One member of a BLOB vector; definitions carry no payload
#[derive(Debug, Clone, PartialEq)]
pub struct BlobElement {
    pub name: String,
    pub label: String,
    pub blob: Option<Blob>,
}

/// The ordered members of a property, typed by kind
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Number(Vec<NumberElement>),
    Text(Vec<TextElement>),
    Switch(Vec<SwitchElement>),
    Light(Vec<LightElement>),
    Blob(Vec<BlobElement>),
}

impl Elements {
    /// Returns the kind shared by all members
    pub fn kind(&self) -> PropertyKind {
        match self {
            Elements::Number(_) => PropertyKind::Number,
            Elements::Text(_) => PropertyKind::Text,
            Elements::Switch(_) => PropertyKind::Switch,
            Elements::Light(_) => PropertyKind::Light,
            Elements::Blob(_) => PropertyKind::Blob,
        }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        match self {
            Elements::Number(v) => v.len(),
            Elements::Text(v) => v.len(),
            Elements::Switch(v) => v.len(),
            Elements::Light(v) => v.len(),
            Elements::Blob(v) => v.len(),
        }
    }

    /// True when the vector has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member names in declaration order
    pub fn names(&self) -> Vec<&str> {
        match self {
            Elements::Number(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Elements::Text(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Elements::Switch(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Elements::Light(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Elements::Blob(v) => v.iter().map(|e| e.name.as_str()).collect(),
        }
    }
}

/// A single element change carried by a set*/new* message
#[derive(Debug, Clone, PartialEq)]
pub enum ElementUpdate {
    Number { name: String, value: f64 },
    Text { name: String, value: String },
    Switch { name: String, state: SwitchState },
    Light { name: String, state: PropertyState },
    Blob { name: String, blob: Blob },
}

impl ElementUpdate {
    /// Name of the element this change addresses
    pub fn name(&self) -> &str {
        match self {
            ElementUpdate::Number { name, .. }
            | ElementUpdate::Text { name, .. }
            | ElementUpdate::Switch { name, .. }
            | ElementUpdate::Light { name, .. }
            | ElementUpdate::Blob { name, .. } => name,
        }
    }

    /// Kind of value this change carries
    pub fn kind(&self) -> PropertyKind {
        match self {
            ElementUpdate::Number { .. } => PropertyKind::Number,
            ElementUpdate::Text { .. } => PropertyKind::Text,
            ElementUpdate::Switch { .. } => PropertyKind::Switch,
            ElementUpdate::Light { .. } => PropertyKind::Light,
            ElementUpdate::Blob { .. } => PropertyKind::Blob,
        }
    }
}

/// The atomic unit of device state and control
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Owning device name, unique per registry
    pub device: String,
    /// Property name, unique per device
    pub name: String,
    /// Display label
    pub label: String,
    /// Tab/category hint, no functional effect
    pub group: String,
    /// Whole-property status
    pub state: PropertyState,
    /// Client access advisory; absent for Light
    pub perm: Option<Permission>,
    /// Worst-case seconds for a pending change to resolve; absent for Light
    pub timeout: Option<f64>,
    /// Member coupling constraint; Switch only
    pub rule: Option<SwitchRule>,
    /// Time of definition or last update
    pub timestamp: Option<Timestamp>,
    /// Ordered members, all sharing one kind
    pub elements: Elements,
}

impl Property {
    /// Returns the property's kind
    pub fn kind(&self) -> PropertyKind {
        self.elements.kind()
    }

    /// Validates kind-specific structural rules for a definition.
    ///
    /// Checks identity fields, element name uniqueness, the presence of
    /// permission/rule where the kind demands them and their absence where it
    /// forbids them, number format well-formedness, and that the initial
    /// switch states satisfy the declared rule.
    pub fn validate_define(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(Error::invalid_spec("empty device name"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid_spec("empty property name"));
        }
        if self.elements.is_empty() {
            return Err(Error::invalid_spec(format!(
                "property '{}' defines no elements",
                self.name
            )));
        }

        let names = self.elements.names();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::invalid_spec(format!(
                    "property '{}' has an unnamed element",
                    self.name
                )));
            }
            if names[..i].contains(name) {
                return Err(Error::invalid_spec(format!(
                    "duplicate element '{}' in property '{}'",
                    name, self.name
                )));
            }
        }

        match self.kind() {
            PropertyKind::Light => {
                if self.perm.is_some() || self.timeout.is_some() {
                    return Err(Error::invalid_spec(format!(
                        "light property '{}' cannot carry permission or timeout",
                        self.name
                    )));
                }
            }
            kind => {
                if self.perm.is_none() {
                    return Err(Error::invalid_spec(format!(
                        "{} property '{}' needs a permission",
                        kind, self.name
                    )));
                }
            }
        }

        match (&self.elements, self.rule) {
            (Elements::Switch(members), Some(rule)) => {
                let on = members.iter().filter(|m| m.state.is_on()).count();
                match rule {
                    SwitchRule::OneOfMany if on != 1 => {
                        return Err(Error::invalid_spec(format!(
                            "OneOfMany property '{}' defined with {} elements On",
                            self.name, on
                        )));
                    }
                    SwitchRule::AtMostOne if on > 1 => {
                        return Err(Error::invalid_spec(format!(
                            "AtMostOne property '{}' defined with {} elements On",
                            self.name, on
                        )));
                    }
                    _ => {}
                }
            }
            (Elements::Switch(_), None) => {
                return Err(Error::invalid_spec(format!(
                    "switch property '{}' needs a rule",
                    self.name
                )));
            }
            (_, Some(_)) => {
                return Err(Error::invalid_spec(format!(
                    "non-switch property '{}' cannot carry a rule",
                    self.name
                )));
            }
            _ => {}
        }

        Ok(())
    }

    /// Applies a set of element changes plus any vector-level attributes
    /// atomically: on any error the property is left untouched.
    pub fn apply_update(
        &mut self,
        changes: &[ElementUpdate],
        state: Option<PropertyState>,
        timeout: Option<f64>,
        timestamp: Option<Timestamp>,
    ) -> Result<()> {
        // Work on a scratch copy so a failed change never leaves the vector
        // mid-update
        let mut scratch = self.elements.clone();
        match &mut scratch {
            Elements::Number(members) => {
                for change in changes {
                    match change {
                        ElementUpdate::Number { name, value } => {
                            find_member(members, name, &self.name, |m| &m.name)?.value = *value;
                        }
                        other => return Err(kind_mismatch(&self.name, other)),
                    }
                }
            }
            Elements::Text(members) => {
                for change in changes {
                    match change {
                        ElementUpdate::Text { name, value } => {
                            find_member(members, name, &self.name, |m| &m.name)?.value =
                                value.clone();
                        }
                        other => return Err(kind_mismatch(&self.name, other)),
                    }
                }
            }
            Elements::Switch(members) => {
                let rule = self.rule.unwrap_or(SwitchRule::AnyOfMany);
                apply_switch_changes(rule, members, changes, &self.name)?;
            }
            Elements::Light(members) => {
                for change in changes {
                    match change {
                        ElementUpdate::Light { name, state } => {
                            find_member(members, name, &self.name, |m| &m.name)?.state = *state;
                        }
                        other => return Err(kind_mismatch(&self.name, other)),
                    }
                }
            }
            Elements::Blob(members) => {
                for change in changes {
                    match change {
                        ElementUpdate::Blob { name, blob } => {
                            find_member(members, name, &self.name, |m| &m.name)?.blob =
                                Some(blob.clone());
                        }
                        other => return Err(kind_mismatch(&self.name, other)),
                    }
                }
            }
        }

        self.elements = scratch;
        if let Some(state) = state {
            self.state = state;
        }
        if timeout.is_some() {
            self.timeout = timeout;
        }
        if timestamp.is_some() {
            self.timestamp = timestamp;
        }
        Ok(())
    }

    /// Looks up a Number member's current value
    pub fn number(&self, element: &str) -> Option<f64> {
        match &self.elements {
            Elements::Number(members) => {
                members.iter().find(|m| m.name == element).map(|m| m.value)
            }
            _ => None,
        }
    }

    /// Looks up a Text member's current value
    pub fn text(&self, element: &str) -> Option<&str> {
        match &self.elements {
            Elements::Text(members) => members
                .iter()
                .find(|m| m.name == element)
                .map(|m| m.value.as_str()),
            _ => None,
        }
    }

    /// Looks up a Switch member's current state
    pub fn switch(&self, element: &str) -> Option<SwitchState> {
        match &self.elements {
            Elements::Switch(members) => {
                members.iter().find(|m| m.name == element).map(|m| m.state)
            }
            _ => None,
        }
    }

    /// Looks up a Light member's current state
    pub fn light(&self, element: &str) -> Option<PropertyState> {
        match &self.elements {
            Elements::Light(members) => {
                members.iter().find(|m| m.name == element).map(|m| m.state)
            }
            _ => None,
        }
    }

    /// Looks up a BLOB member's current payload
    pub fn blob(&self, element: &str) -> Option<&Blob> {
        match &self.elements {
            Elements::Blob(members) => members
                .iter()
                .find(|m| m.name == element)
                .and_then(|m| m.blob.as_ref()),
            _ => None,
        }
    }
}

fn find_member<'a, T>(
    members: &'a mut Vec<T>,
    element: &str,
    property: &str,
    name_of: impl Fn(&T) -> &String,
) -> Result<&'a mut T> {
    members
        .iter_mut()
        .find(|m| name_of(m) == element)
        .ok_or_else(|| {
            Error::unknown_element(format!("no element '{}' on property '{}'", element, property))
        })
}

fn kind_mismatch(property: &str, change: &ElementUpdate) -> Error {
    Error::parse(format!(
        "{} change for element '{}' does not match property '{}'",
        change.kind(),
        change.name(),
        property
    ))
}

/// Applies switch changes with the rule's implicit coupling.
///
/// OneOfMany and AtMostOne turn all siblings Off whenever a change turns a
/// member On; OneOfMany additionally refuses to leave the vector all-Off.
/// The coupling is identical whether the change came from an authoritative
/// set* or is being prepared locally for a new* request.
pub fn apply_switch_changes(
    rule: SwitchRule,
    members: &mut [SwitchElement],
    changes: &[ElementUpdate],
    property: &str,
) -> Result<()> {
    for change in changes {
        let (name, state) = match change {
            ElementUpdate::Switch { name, state } => (name, *state),
            other => return Err(kind_mismatch(property, other)),
        };
        let idx = members
            .iter()
            .position(|m| &m.name == name)
            .ok_or_else(|| {
                Error::unknown_element(format!("no element '{}' on property '{}'", name, property))
            })?;
        members[idx].state = state;
        if state.is_on() && rule != SwitchRule::AnyOfMany {
            for (j, member) in members.iter_mut().enumerate() {
                if j != idx {
                    member.state = SwitchState::Off;
                }
            }
        }
    }

    if rule == SwitchRule::OneOfMany && !members.iter().any(|m| m.state.is_on()) {
        return Err(Error::rule_violation(format!(
            "update would leave OneOfMany property '{}' all-Off",
            property
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch_property(rule: SwitchRule, states: &[(&str, SwitchState)]) -> Property {
        Property {
            device: "Telescope Simulator".into(),
            name: "MOUNT_TYPE".into(),
            label: "Mount type".into(),
            group: "Options".into(),
            state: PropertyState::Idle,
            perm: Some(Permission::ReadWrite),
            timeout: Some(60.0),
            rule: Some(rule),
            timestamp: None,
            elements: Elements::Switch(
                states
                    .iter()
                    .map(|(name, state)| SwitchElement {
                        name: (*name).into(),
                        label: (*name).into(),
                        state: *state,
                    })
                    .collect(),
            ),
        }
    }

    fn number_property() -> Property {
        Property {
            device: "CCD Simulator".into(),
            name: "CCD_EXPOSURE".into(),
            label: "Expose".into(),
            group: "Main Control".into(),
            state: PropertyState::Idle,
            perm: Some(Permission::ReadWrite),
            timeout: Some(36000.0),
            rule: None,
            timestamp: None,
            elements: Elements::Number(vec![NumberElement {
                name: "CCD_EXPOSURE_VALUE".into(),
                label: "Duration (s)".into(),
                format: "%5.2f".parse().unwrap(),
                min: 0.0,
                max: 36000.0,
                step: 0.0,
                value: 1.0,
            }]),
        }
    }

    #[test]
    fn test_define_validation_accepts_good_specs() {
        assert!(number_property().validate_define().is_ok());
        let prop = switch_property(
            SwitchRule::OneOfMany,
            &[("MOUNT_GEM", SwitchState::On), ("MOUNT_SINGLE_ARM", SwitchState::Off)],
        );
        assert!(prop.validate_define().is_ok());
    }

    #[test]
    fn test_define_validation_rejects_rule_violations() {
        let prop = switch_property(
            SwitchRule::OneOfMany,
            &[("A", SwitchState::Off), ("B", SwitchState::Off)],
        );
        assert!(matches!(
            prop.validate_define(),
            Err(Error::InvalidPropertySpec(_))
        ));

        let prop = switch_property(
            SwitchRule::AtMostOne,
            &[("A", SwitchState::On), ("B", SwitchState::On)],
        );
        assert!(prop.validate_define().is_err());
    }

    #[test]
    fn test_define_validation_rejects_structural_problems() {
        let mut prop = number_property();
        prop.perm = None;
        assert!(prop.validate_define().is_err());

        let mut prop = number_property();
        prop.rule = Some(SwitchRule::AnyOfMany);
        assert!(prop.validate_define().is_err());

        let mut prop = number_property();
        if let Elements::Number(members) = &mut prop.elements {
            let dup = members[0].clone();
            members.push(dup);
        }
        assert!(prop.validate_define().is_err());

        let mut prop = switch_property(SwitchRule::OneOfMany, &[("A", SwitchState::On)]);
        prop.rule = None;
        assert!(prop.validate_define().is_err());
    }

    #[test]
    fn test_apply_update_merges_values() {
        let mut prop = number_property();
        prop.apply_update(
            &[ElementUpdate::Number {
                name: "CCD_EXPOSURE_VALUE".into(),
                value: 0.0,
            }],
            Some(PropertyState::Ok),
            None,
            None,
        )
        .unwrap();
        assert_eq!(prop.number("CCD_EXPOSURE_VALUE"), Some(0.0));
        assert_eq!(prop.state, PropertyState::Ok);
    }

    #[test]
    fn test_apply_update_unknown_element_leaves_property_untouched() {
        let mut prop = number_property();
        let before = prop.clone();
        let err = prop.apply_update(
            &[
                ElementUpdate::Number {
                    name: "CCD_EXPOSURE_VALUE".into(),
                    value: 7.0,
                },
                ElementUpdate::Number {
                    name: "NOPE".into(),
                    value: 1.0,
                },
            ],
            Some(PropertyState::Busy),
            None,
            None,
        );
        assert!(matches!(err, Err(Error::UnknownElement(_))));
        // Atomicity: the valid first change must not have leaked through
        assert_eq!(prop, before);
    }

    #[test]
    fn test_apply_update_kind_mismatch() {
        let mut prop = number_property();
        let err = prop.apply_update(
            &[ElementUpdate::Text {
                name: "CCD_EXPOSURE_VALUE".into(),
                value: "1".into(),
            }],
            None,
            None,
            None,
        );
        assert!(matches!(err, Err(Error::Parse(_))));
    }

    #[test]
    fn test_one_of_many_coupling() {
        let mut prop = switch_property(
            SwitchRule::OneOfMany,
            &[("MOUNT_GEM", SwitchState::On), ("MOUNT_SINGLE_ARM", SwitchState::Off)],
        );
        prop.apply_update(
            &[ElementUpdate::Switch {
                name: "MOUNT_SINGLE_ARM".into(),
                state: SwitchState::On,
            }],
            Some(PropertyState::Ok),
            None,
            None,
        )
        .unwrap();
        assert_eq!(prop.switch("MOUNT_GEM"), Some(SwitchState::Off));
        assert_eq!(prop.switch("MOUNT_SINGLE_ARM"), Some(SwitchState::On));
        assert_eq!(prop.state, PropertyState::Ok);
    }

    #[test]
    fn test_one_of_many_all_off_refused() {
        let mut prop = switch_property(
            SwitchRule::OneOfMany,
            &[("A", SwitchState::On), ("B", SwitchState::Off)],
        );
        let before = prop.clone();
        let err = prop.apply_update(
            &[ElementUpdate::Switch {
                name: "A".into(),
                state: SwitchState::Off,
            }],
            None,
            None,
            None,
        );
        assert!(matches!(err, Err(Error::RuleViolation(_))));
        assert_eq!(prop, before);
    }

    #[test]
    fn test_at_most_one_allows_all_off() {
        let mut prop = switch_property(
            SwitchRule::AtMostOne,
            &[("A", SwitchState::On), ("B", SwitchState::Off)],
        );
        prop.apply_update(
            &[ElementUpdate::Switch {
                name: "A".into(),
                state: SwitchState::Off,
            }],
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(prop.switch("A"), Some(SwitchState::Off));
        assert_eq!(prop.switch("B"), Some(SwitchState::Off));

        prop.apply_update(
            &[ElementUpdate::Switch {
                name: "B".into(),
                state: SwitchState::On,
            }],
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(prop.switch("A"), Some(SwitchState::Off));
        assert_eq!(prop.switch("B"), Some(SwitchState::On));
    }

    #[test]
    fn test_any_of_many_independent() {
        let mut prop = switch_property(
            SwitchRule::AnyOfMany,
            &[("A", SwitchState::On), ("B", SwitchState::Off)],
        );
        prop.apply_update(
            &[ElementUpdate::Switch {
                name: "B".into(),
                state: SwitchState::On,
            }],
            None,
            None,
            None,
        )
        .unwrap();
        // No implicit coupling: both stay On
        assert_eq!(prop.switch("A"), Some(SwitchState::On));
        assert_eq!(prop.switch("B"), Some(SwitchState::On));
    }
}
