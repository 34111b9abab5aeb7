//! Device settings tree
//!
//! The camera describes its adjustable parameters as a tree of named nodes.
//! Containers group children; leaves carry a typed value and, for radio and
//! menu widgets, an ordered list of valid choices. The tree is an owned
//! snapshot: changes are staged on leaves and only reach the device through
//! `SettingsWalker::commit`.

use crate::driver::CameraDriver;
use crate::errors::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Text,
    Range,
    Toggle,
    Radio,
    Menu,
    Button,
    Date,
}

impl WidgetKind {
    pub fn is_enumerated(self) -> bool {
        matches!(self, WidgetKind::Radio | WidgetKind::Menu)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingValue {
    Text(String),
    Float(f32),
    Int(i32),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Text(_) => "text",
            SettingValue::Float(_) => "float",
            SettingValue::Int(_) => "integer",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SettingValue::Text(text) => write!(f, "\"{}\"", text),
            SettingValue::Float(number) => write!(f, "{}", number),
            SettingValue::Int(number) => write!(f, "{}", number),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f32> for SettingValue {
    fn from(value: f32) -> Self {
        SettingValue::Float(value)
    }
}

/// A leaf of the settings tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub label: String,
    pub kind: WidgetKind,
    pub readonly: bool,
    value: Option<SettingValue>,
    choices: Option<Vec<String>>,
    #[serde(skip)]
    changed: bool,
}

impl Setting {
    pub fn new(name: impl Into<String>, kind: WidgetKind) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            kind,
            readonly: false,
            value: None,
            choices: None,
            changed: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Current value as reported by the device. Not staged.
    pub fn with_value(mut self, value: impl Into<SettingValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn value(&self) -> Option<&SettingValue> {
        self.value.as_ref()
    }

    /// True once a value has been staged and not yet committed.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Ordered valid values of an enumerated (radio/menu) leaf.
    pub fn choices(&self) -> Result<&[String], ConfigError> {
        match (&self.choices, self.kind.is_enumerated()) {
            (Some(choices), true) => Ok(choices),
            (None, true) => Ok(&[]),
            _ => Err(ConfigError::NotEnumerated(self.name.clone())),
        }
    }

    pub fn choice_at(&self, index: usize) -> Result<&str, ConfigError> {
        let choices = self.choices()?;
        choices
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                len: choices.len(),
            })
    }

    /// Stage a new value. Takes effect on the next commit.
    pub fn set_value(&mut self, value: impl Into<SettingValue>) -> Result<(), ConfigError> {
        let value = value.into();
        if self.readonly {
            return Err(ConfigError::ReadOnly(self.name.clone()));
        }

        let value = match (self.kind, value) {
            (WidgetKind::Text, SettingValue::Text(text)) => SettingValue::Text(text),
            (WidgetKind::Radio | WidgetKind::Menu, SettingValue::Text(text)) => {
                if let Some(choices) = &self.choices {
                    if !choices.iter().any(|c| *c == text) {
                        return Err(ConfigError::InvalidChoice {
                            name: self.name.clone(),
                            value: text,
                        });
                    }
                }
                SettingValue::Text(text)
            }
            (WidgetKind::Range, SettingValue::Float(number)) => SettingValue::Float(number),
            (WidgetKind::Range, SettingValue::Int(number)) => SettingValue::Float(number as f32),
            (WidgetKind::Toggle | WidgetKind::Date, SettingValue::Int(number)) => {
                SettingValue::Int(number)
            }
            (_, other) => {
                return Err(ConfigError::TypeMismatch {
                    name: self.name.clone(),
                    given: other.type_name(),
                })
            }
        };

        self.value = Some(value);
        self.changed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingsNode {
    Container {
        name: String,
        label: String,
        children: Vec<SettingsNode>,
    },
    Leaf(Setting),
}

impl SettingsNode {
    pub fn container(name: impl Into<String>, children: Vec<SettingsNode>) -> Self {
        SettingsNode::Container {
            name: name.into(),
            label: String::new(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SettingsNode::Container { name, .. } => name,
            SettingsNode::Leaf(setting) => &setting.name,
        }
    }

    pub fn children(&self) -> &[SettingsNode] {
        match self {
            SettingsNode::Container { children, .. } => children,
            SettingsNode::Leaf(_) => &[],
        }
    }

    pub fn as_setting(&self) -> Option<&Setting> {
        match self {
            SettingsNode::Leaf(setting) => Some(setting),
            SettingsNode::Container { .. } => None,
        }
    }

    pub fn as_setting_mut(&mut self) -> Option<&mut Setting> {
        match self {
            SettingsNode::Leaf(setting) => Some(setting),
            SettingsNode::Container { .. } => None,
        }
    }

    /// Depth-first search of the descendants for an exact name match.
    pub fn child_by_name(&self, name: &str) -> Result<&SettingsNode, ConfigError> {
        self.find(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    pub fn child_by_name_mut(&mut self, name: &str) -> Result<&mut SettingsNode, ConfigError> {
        self.find_mut(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    fn find(&self, name: &str) -> Option<&SettingsNode> {
        for child in self.children() {
            if child.name() == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut SettingsNode> {
        let SettingsNode::Container { children, .. } = self else {
            return None;
        };
        for child in children.iter_mut() {
            if child.name() == name {
                return Some(child);
            }
            if let Some(found) = child.find_mut(name) {
                return Some(found);
            }
        }
        None
    }

    /// The leaf named `name`, failing if it is absent or a container.
    pub fn setting(&self, name: &str) -> Result<&Setting, ConfigError> {
        self.child_by_name(name)?
            .as_setting()
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    pub fn setting_mut(&mut self, name: &str) -> Result<&mut Setting, ConfigError> {
        self.child_by_name_mut(name)?
            .as_setting_mut()
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    pub fn get_choices(&self) -> Result<&[String], ConfigError> {
        match self {
            SettingsNode::Leaf(setting) => setting.choices(),
            SettingsNode::Container { name, .. } => Err(ConfigError::NotEnumerated(name.clone())),
        }
    }

    pub fn set_value(&mut self, value: impl Into<SettingValue>) -> Result<(), ConfigError> {
        match self {
            SettingsNode::Leaf(setting) => setting.set_value(value),
            SettingsNode::Container { name, .. } => Err(ConfigError::TypeMismatch {
                name: name.clone(),
                given: value.into().type_name(),
            }),
        }
    }

    /// Leaves with staged values, in tree order.
    pub fn changed(&self) -> Vec<&Setting> {
        let mut out = Vec::new();
        self.collect_changed(&mut out);
        out
    }

    fn collect_changed<'a>(&'a self, out: &mut Vec<&'a Setting>) {
        match self {
            SettingsNode::Leaf(setting) if setting.changed => out.push(setting),
            SettingsNode::Leaf(_) => {}
            SettingsNode::Container { children, .. } => {
                for child in children {
                    child.collect_changed(out);
                }
            }
        }
    }

    pub(crate) fn clear_changed(&mut self) {
        match self {
            SettingsNode::Leaf(setting) => setting.changed = false,
            SettingsNode::Container { children, .. } => {
                children.iter_mut().for_each(Self::clear_changed)
            }
        }
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Reads and commits the settings tree of the connected device.
///
/// Borrowed from a session while its lock is held.
pub struct SettingsWalker<'a, D: CameraDriver> {
    driver: &'a mut D,
    device: Option<&'a mut D::Device>,
}

impl<'a, D: CameraDriver> SettingsWalker<'a, D> {
    pub fn new(driver: &'a mut D, device: Option<&'a mut D::Device>) -> Self {
        Self { driver, device }
    }

    /// Fetch a fresh snapshot of the whole tree.
    pub fn get_root(&mut self) -> Result<SettingsNode, ConfigError> {
        let device = self.device.as_deref_mut().ok_or(ConfigError::NotConnected)?;
        Ok(self.driver.config_get_root(device)?)
    }

    /// Push every staged change in `tree` to the device.
    ///
    /// A tree without staged changes is not sent. On success the staged
    /// flags are cleared.
    pub fn commit(&mut self, tree: &mut SettingsNode) -> Result<(), ConfigError> {
        let device = self.device.as_deref_mut().ok_or(ConfigError::NotConnected)?;
        if tree.changed().is_empty() {
            debug!("[Settings] Nothing staged, skipping commit");
            return Ok(());
        }
        self.driver.config_set(device, tree)?;
        tree.clear_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> SettingsNode {
        SettingsNode::container(
            "main",
            vec![
                SettingsNode::container(
                    "settings",
                    vec![
                        SettingsNode::Leaf(
                            Setting::new("capture", WidgetKind::Toggle).with_value(0),
                        ),
                        SettingsNode::Leaf(
                            Setting::new("capturetarget", WidgetKind::Radio)
                                .with_value("Internal RAM")
                                .with_choices(["Internal RAM", "Memory card"]),
                        ),
                    ],
                ),
                SettingsNode::container(
                    "status",
                    vec![SettingsNode::Leaf(
                        Setting::new("serialnumber", WidgetKind::Text)
                            .with_value("0123")
                            .read_only(),
                    )],
                ),
                SettingsNode::Leaf(Setting::new("aperture", WidgetKind::Range).with_value(5.6f32)),
            ],
        )
    }

    #[test]
    fn lookup_descends_into_sections() {
        let tree = sample_tree();
        assert_eq!(tree.child_by_name("capturetarget").unwrap().name(), "capturetarget");
        assert_eq!(tree.child_by_name("status").unwrap().children().len(), 1);
        assert_eq!(
            tree.child_by_name("eosremoterelease"),
            Err(ConfigError::NotFound("eosremoterelease".to_string()))
        );
    }

    #[test]
    fn choices_only_for_enumerated_leaves() {
        let tree = sample_tree();
        assert_eq!(
            tree.child_by_name("capturetarget").unwrap().get_choices().unwrap(),
            ["Internal RAM".to_string(), "Memory card".to_string()]
        );
        assert!(matches!(
            tree.child_by_name("capture").unwrap().get_choices(),
            Err(ConfigError::NotEnumerated(_))
        ));
        assert!(matches!(tree.get_choices(), Err(ConfigError::NotEnumerated(_))));
    }

    #[test]
    fn choice_index_past_end_is_rejected() {
        let tree = sample_tree();
        let target = tree.setting("capturetarget").unwrap();
        assert_eq!(target.choice_at(1).unwrap(), "Memory card");
        assert_eq!(
            target.choice_at(2),
            Err(ConfigError::IndexOutOfRange {
                name: "capturetarget".to_string(),
                index: 2,
                len: 2,
            })
        );
    }

    #[test]
    fn set_value_enforces_choice_list() {
        let mut tree = sample_tree();
        let target = tree.setting_mut("capturetarget").unwrap();

        let err = target.set_value("SD slot 2").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidChoice { .. }));
        assert!(!target.is_changed());
        assert_eq!(target.value(), Some(&SettingValue::from("Internal RAM")));

        target.set_value("Memory card").unwrap();
        assert!(target.is_changed());
        assert_eq!(target.value(), Some(&SettingValue::from("Memory card")));
    }

    #[test]
    fn set_value_checks_widget_type() {
        let mut tree = sample_tree();
        assert!(matches!(
            tree.setting_mut("capture").unwrap().set_value("on"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        tree.setting_mut("capture").unwrap().set_value(1).unwrap();

        tree.setting_mut("aperture").unwrap().set_value(8).unwrap();
        assert_eq!(tree.setting("aperture").unwrap().value(), Some(&SettingValue::Float(8.0)));

        assert_eq!(
            tree.setting_mut("serialnumber").unwrap().set_value("x"),
            Err(ConfigError::ReadOnly("serialnumber".to_string()))
        );
        assert!(tree.child_by_name_mut("settings").unwrap().set_value(1).is_err());
    }

    #[test]
    fn changed_lists_staged_leaves_in_order() {
        let mut tree = sample_tree();
        assert!(tree.changed().is_empty());

        tree.setting_mut("aperture").unwrap().set_value(2.8f32).unwrap();
        tree.setting_mut("capture").unwrap().set_value(1).unwrap();
        let names: Vec<&str> = tree.changed().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["capture", "aperture"]);

        tree.clear_changed();
        assert!(tree.changed().is_empty());
    }

    #[test]
    fn tree_serializes_with_type_tags() {
        let json = serde_json::to_value(sample_tree()).unwrap();
        assert_eq!(json["type"], "container");
        assert_eq!(json["children"][0]["children"][1]["kind"], "radio");
    }
}
