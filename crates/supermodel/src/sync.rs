#![forbid(unsafe_code)]

//! Binding store keys to properties of external objects.
//!
//! A binding pushes store-side changes into `target.set_property(..)`. The
//! property name selects which event drives it:
//!
//! | property       | driven by              | forwarded value    |
//! |----------------|------------------------|--------------------|
//! | `"label"`      | `set:<store_key>`      | the new value      |
//! | `"valid:ok"`   | `validate:<store_key>` | `true` / `false`   |
//! | `"compute:x"`  | `compute:<store_key>`  | the computed value |
//!
//! When the target exposes a [`TextInput`], edits flow back into the store
//! (trimmed, then revalidated if the key has a validator). `valid:` bindings
//! never install this reverse path. Targets without the capability simply
//! get a forward-only binding.
//!
//! Deleting the store key tears the binding down in both directions, silent
//! deletes included.
//! Binding the same `(target, property)` again replaces the old binding.

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::emitter::Listener;
use crate::model::{Model, WeakModel, keyed};

/// An object whose properties can be driven from the store.
pub trait SyncTarget {
    fn set_property(&self, property: &str, value: &Value);

    /// Editable-text capability, if the target has one.
    fn text_input(&self) -> Option<&dyn TextInput> {
        None
    }
}

/// Gettable text with change notification.
///
/// Implementations must call every registered callback after the user edits
/// the text, and must not call them for programmatic `set_property` writes.
pub trait TextInput {
    fn text(&self) -> String;
    fn on_change(&self, callback: Rc<dyn Fn()>) -> ChangeToken;
    fn off_change(&self, token: ChangeToken);
}

/// Identifies one change callback registered on a [`TextInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeToken(pub u64);

/// Which event namespace drives a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Set,
    Validate,
    Compute,
}

impl BindingMode {
    /// Split a bound property string into its mode and bare property name.
    #[must_use]
    pub fn parse(prop_key: &str) -> (Self, &str) {
        if let Some(prop) = prop_key.strip_prefix("valid:") {
            (Self::Validate, prop)
        } else if let Some(prop) = prop_key.strip_prefix("compute:") {
            (Self::Compute, prop)
        } else {
            (Self::Set, prop_key)
        }
    }

    #[must_use]
    pub fn event_action(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Validate => "validate",
            Self::Compute => "compute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TargetId(usize);

impl TargetId {
    fn of(target: &Rc<dyn SyncTarget>) -> Self {
        Self(Rc::as_ptr(target).cast::<()>() as usize)
    }
}

pub(crate) struct Binding {
    store_key: String,
    mode: BindingMode,
    forward: Listener,
    teardown: Listener,
    reverse: Option<ChangeToken>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("store_key", &self.store_key)
            .field("mode", &self.mode)
            .field("reverse", &self.reverse)
            .finish()
    }
}

impl Binding {
    /// Unsubscribe both directions.
    pub(crate) fn release(self, target: &dyn SyncTarget) {
        self.forward.off();
        self.teardown.off();
        if let (Some(token), Some(input)) = (self.reverse, target.text_input()) {
            input.off_change(token);
        }
    }
}

struct TargetBindings {
    target: Rc<dyn SyncTarget>,
    bindings: HashMap<String, Binding>,
}

#[derive(Default)]
pub(crate) struct SyncRegistry {
    targets: HashMap<TargetId, TargetBindings>,
}

impl fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.targets
                    .iter()
                    .map(|(id, group)| (id.0, group.bindings.keys().collect::<Vec<_>>())),
            )
            .finish()
    }
}

impl SyncRegistry {
    fn insert(
        &mut self,
        target: Rc<dyn SyncTarget>,
        prop_key: String,
        binding: Binding,
    ) -> Option<Binding> {
        self.targets
            .entry(TargetId::of(&target))
            .or_insert_with(|| TargetBindings {
                target,
                bindings: HashMap::new(),
            })
            .bindings
            .insert(prop_key, binding)
    }

    fn remove(&mut self, id: TargetId, prop_key: &str) -> Option<(Rc<dyn SyncTarget>, Binding)> {
        let group = self.targets.get_mut(&id)?;
        let binding = group.bindings.remove(prop_key)?;
        let target = Rc::clone(&group.target);
        if group.bindings.is_empty() {
            self.targets.remove(&id);
        }
        Some((target, binding))
    }

    fn remove_target(&mut self, id: TargetId) -> Vec<(Rc<dyn SyncTarget>, Binding)> {
        self.targets
            .remove(&id)
            .map(|group| {
                let target = group.target;
                group
                    .bindings
                    .into_values()
                    .map(|b| (Rc::clone(&target), b))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Detach every binding driven by `store_key`, across all targets.
    fn remove_store_key(&mut self, store_key: &str) -> Vec<(Rc<dyn SyncTarget>, Binding)> {
        let mut released = Vec::new();
        self.targets.retain(|_, group| {
            let stale: Vec<String> = group
                .bindings
                .iter()
                .filter(|(_, b)| b.store_key == store_key)
                .map(|(prop_key, _)| prop_key.clone())
                .collect();
            for prop_key in stale {
                if let Some(binding) = group.bindings.remove(&prop_key) {
                    released.push((Rc::clone(&group.target), binding));
                }
            }
            !group.bindings.is_empty()
        });
        released
    }

    pub(crate) fn drain(&mut self) -> Vec<(Rc<dyn SyncTarget>, Binding)> {
        let ids: Vec<TargetId> = self.targets.keys().copied().collect();
        ids.into_iter()
            .flat_map(|id| self.remove_target(id))
            .collect()
    }

    fn count(&self, id: TargetId) -> usize {
        self.targets.get(&id).map_or(0, |g| g.bindings.len())
    }

    fn contains(&self, id: TargetId, prop_key: &str) -> bool {
        self.targets
            .get(&id)
            .is_some_and(|g| g.bindings.contains_key(prop_key))
    }
}

impl Model {
    /// Bind `target.property` to the store key of the same (bare) name.
    pub fn sync<T: SyncTarget + 'static>(&self, target: &Rc<T>, property: &str) -> &Self {
        self.bind(as_dyn(target), property, None)
    }

    /// Bind `target.property` to `store_key`.
    pub fn sync_as<T: SyncTarget + 'static>(
        &self,
        target: &Rc<T>,
        property: &str,
        store_key: &str,
    ) -> &Self {
        self.bind(as_dyn(target), property, Some(store_key))
    }

    /// Remove one binding of `target`, or all of them when `property` is `None`.
    pub fn stop_sync<T: SyncTarget + 'static>(
        &self,
        target: &Rc<T>,
        property: Option<&str>,
    ) -> &Self {
        let id = TargetId::of(&as_dyn(target));
        let released = {
            let mut syncs = self.inner.syncs.borrow_mut();
            match property {
                Some(prop_key) => syncs.remove(id, prop_key).into_iter().collect(),
                None => syncs.remove_target(id),
            }
        };
        release_all(released);
        self
    }

    /// Number of live bindings on `target`.
    #[must_use]
    pub fn binding_count<T: SyncTarget + 'static>(&self, target: &Rc<T>) -> usize {
        self.inner.syncs.borrow().count(TargetId::of(&as_dyn(target)))
    }

    #[must_use]
    pub fn is_synced<T: SyncTarget + 'static>(&self, target: &Rc<T>, property: &str) -> bool {
        self.inner
            .syncs
            .borrow()
            .contains(TargetId::of(&as_dyn(target)), property)
    }

    /// Tear down every binding on `store_key`. Removal of the key calls this
    /// whether or not it announced itself.
    pub(crate) fn release_bindings(&self, store_key: &str) {
        let released = self.inner.syncs.borrow_mut().remove_store_key(store_key);
        if !released.is_empty() {
            tracing::debug!(store_key, count = released.len(), "bindings torn down by delete");
        }
        release_all(released);
    }

    fn bind(&self, target: Rc<dyn SyncTarget>, prop_key: &str, store_key: Option<&str>) -> &Self {
        let (mode, property) = BindingMode::parse(prop_key);
        let store_key = store_key.unwrap_or(property).to_owned();
        let id = TargetId::of(&target);

        let replaced = self.inner.syncs.borrow_mut().remove(id, prop_key);
        release_all(replaced);

        let forward = {
            let weak_target = Rc::downgrade(&target);
            let property = property.to_owned();
            self.on(keyed(mode.event_action(), &store_key), move |args| {
                if let (Some(target), Some(value)) = (weak_target.upgrade(), args.first()) {
                    target.set_property(&property, value);
                }
            })
        };

        let teardown = {
            let model = self.downgrade();
            let prop_key = prop_key.to_owned();
            self.once(keyed("delete", &store_key), move |_| {
                if let Some(model) = model.upgrade() {
                    let released = model.inner.syncs.borrow_mut().remove(id, &prop_key);
                    tracing::debug!(property = %prop_key, "binding torn down by delete");
                    release_all(released);
                }
            })
        };

        let reverse = if mode == BindingMode::Validate {
            None
        } else {
            target.text_input().map(|input| {
                input.on_change(reverse_callback(
                    self.downgrade(),
                    Rc::downgrade(&target),
                    store_key.clone(),
                ))
            })
        };

        let initial = match mode {
            BindingMode::Set => self.peek(&store_key),
            BindingMode::Validate => self
                .has(&store_key)
                .then(|| Value::Bool(self.validity(&store_key))),
            BindingMode::Compute => self.evaluate_computed(&store_key),
        };
        if let Some(value) = initial {
            target.set_property(property, &value);
        }

        tracing::debug!(
            property = prop_key,
            store_key = %store_key,
            mode = ?mode,
            reverse = reverse.is_some(),
            "binding installed"
        );
        let binding = Binding {
            store_key,
            mode,
            forward,
            teardown,
            reverse,
        };
        let displaced = self
            .inner
            .syncs
            .borrow_mut()
            .insert(Rc::clone(&target), prop_key.to_owned(), binding);
        if let Some(stale) = displaced {
            // Installed while we were initialising the target; keep ours.
            stale.release(target.as_ref());
        }
        self
    }
}

fn reverse_callback(
    model: WeakModel,
    target: Weak<dyn SyncTarget>,
    store_key: String,
) -> Rc<dyn Fn()> {
    Rc::new(move || {
        let (Some(model), Some(target)) = (model.upgrade(), target.upgrade()) else {
            return;
        };
        let Some(input) = target.text_input() else {
            return;
        };
        let raw = input.text();
        let text = if model.config().trim_input {
            raw.trim().to_owned()
        } else {
            raw
        };
        model.set(&store_key, text);
        if model.has_validator(&store_key) {
            model.validate(&store_key);
        }
    })
}

fn as_dyn<T: SyncTarget + 'static>(target: &Rc<T>) -> Rc<dyn SyncTarget> {
    Rc::clone(target) as Rc<dyn SyncTarget>
}

fn release_all(bindings: impl IntoIterator<Item = (Rc<dyn SyncTarget>, Binding)>) {
    for (target, binding) in bindings {
        binding.release(target.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Label {
        props: RefCell<HashMap<String, Value>>,
    }

    impl SyncTarget for Label {
        fn set_property(&self, property: &str, value: &Value) {
            self.props
                .borrow_mut()
                .insert(property.to_owned(), value.clone());
        }
    }

    impl Label {
        fn prop(&self, name: &str) -> Option<Value> {
            self.props.borrow().get(name).cloned()
        }
    }

    #[derive(Default)]
    struct Field {
        props: RefCell<HashMap<String, Value>>,
        text: RefCell<String>,
        callbacks: RefCell<Vec<(ChangeToken, Rc<dyn Fn()>)>>,
        next_token: Cell<u64>,
    }

    impl Field {
        fn type_text(&self, text: &str) {
            *self.text.borrow_mut() = text.to_owned();
            let callbacks: Vec<Rc<dyn Fn()>> =
                self.callbacks.borrow().iter().map(|(_, cb)| Rc::clone(cb)).collect();
            for cb in callbacks {
                cb();
            }
        }
    }

    impl SyncTarget for Field {
        fn set_property(&self, property: &str, value: &Value) {
            self.props
                .borrow_mut()
                .insert(property.to_owned(), value.clone());
        }

        fn text_input(&self) -> Option<&dyn TextInput> {
            Some(self)
        }
    }

    impl TextInput for Field {
        fn text(&self) -> String {
            self.text.borrow().clone()
        }

        fn on_change(&self, callback: Rc<dyn Fn()>) -> ChangeToken {
            let token = ChangeToken(self.next_token.get());
            self.next_token.set(token.0 + 1);
            self.callbacks.borrow_mut().push((token, callback));
            token
        }

        fn off_change(&self, token: ChangeToken) {
            self.callbacks.borrow_mut().retain(|(t, _)| *t != token);
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(BindingMode::parse("label"), (BindingMode::Set, "label"));
        assert_eq!(BindingMode::parse("valid:ok"), (BindingMode::Validate, "ok"));
        assert_eq!(BindingMode::parse("compute:total"), (BindingMode::Compute, "total"));
    }

    #[test]
    fn initialises_from_present_value() {
        let model = Model::new();
        model.set("title", "hello");
        let label = Rc::new(Label::default());
        model.sync(&label, "title");
        assert_eq!(label.prop("title"), Some(json!("hello")));
    }

    #[test]
    fn stop_single_and_all() {
        let model = Model::new();
        let label = Rc::new(Label::default());
        model.sync(&label, "a").sync(&label, "b");
        assert_eq!(model.binding_count(&label), 2);

        model.stop_sync(&label, Some("a"));
        model.set("a", 1).set("b", 2);
        assert_eq!(label.prop("a"), None);
        assert_eq!(label.prop("b"), Some(json!(2)));

        model.stop_sync(&label, None);
        assert_eq!(model.binding_count(&label), 0);
        model.set("b", 3);
        assert_eq!(label.prop("b"), Some(json!(2)));
        // Stopping again is harmless.
        model.stop_sync(&label, None);
        assert!(!model.emitter().has_listener("set:b", None));
    }

    #[test]
    fn rebinding_replaces_previous_binding() {
        let model = Model::new();
        let label = Rc::new(Label::default());
        model.sync_as(&label, "text", "first");
        model.sync_as(&label, "text", "second");
        assert_eq!(model.binding_count(&label), 1);
        model.set("first", "old");
        assert_eq!(label.prop("text"), None);
        model.set("second", "new");
        assert_eq!(label.prop("text"), Some(json!("new")));
        assert!(!model.emitter().has_listener("set:first", None));
        assert!(!model.emitter().has_listener("delete:first", None));
    }

    #[test]
    fn reverse_propagation_trims_and_revalidates() {
        let model = Model::new();
        model
            .register_validator("name", crate::validate::Rule::predicate(|v| {
                v.as_str().is_some_and(|s| !s.is_empty())
            }))
            .unwrap();
        let field = Rc::new(Field::default());
        let status = Rc::new(Label::default());
        model.sync(&field, "name");
        model.sync_as(&status, "valid:ok", "name");

        field.type_text("  ada  ");
        assert_eq!(model.peek("name"), Some(json!("ada")));
        assert_eq!(status.prop("ok"), Some(json!(true)));

        field.type_text("   ");
        assert_eq!(model.peek("name"), Some(json!("")));
        assert_eq!(status.prop("ok"), Some(json!(false)));
    }

    #[test]
    fn valid_binding_has_no_reverse_path() {
        let model = Model::new();
        let field = Rc::new(Field::default());
        model.sync_as(&field, "valid:flag", "name");
        assert!(field.callbacks.borrow().is_empty());
        field.type_text("typed");
        assert!(!model.has("name"));
    }

    #[test]
    fn untrimmed_when_configured() {
        let config = crate::config::ModelConfig::default().with_trim_input(false);
        let model = Model::with_config(config);
        let field = Rc::new(Field::default());
        model.sync(&field, "name");
        field.type_text(" x ");
        assert_eq!(model.peek("name"), Some(json!(" x ")));
    }

    #[test]
    fn delete_tears_down_both_directions() {
        let model = Model::new();
        let field = Rc::new(Field::default());
        model.sync(&field, "name");
        assert_eq!(field.callbacks.borrow().len(), 1);

        model.delete("name");
        assert_eq!(model.binding_count(&field), 0);
        assert!(field.callbacks.borrow().is_empty());
        model.set("name", "later");
        assert_eq!(field.props.borrow().get("name"), None);
    }

    #[test]
    fn compute_binding_follows_announcements() {
        let model = Model::new();
        model.set("n", 2);
        model.register_computed("double", |m| {
            json!(m.peek("n").and_then(|v| v.as_i64()).unwrap_or(0) * 2)
        });
        let label = Rc::new(Label::default());
        model.sync_as(&label, "compute:value", "double");
        assert_eq!(label.prop("value"), Some(json!(4)));

        model.set("n", 5);
        let _ = model.compute("double");
        assert_eq!(label.prop("value"), Some(json!(4)));
        model.run_pending();
        assert_eq!(label.prop("value"), Some(json!(10)));
    }

    #[test]
    fn dropping_model_releases_reverse_hooks() {
        let field = Rc::new(Field::default());
        {
            let model = Model::new();
            model.sync(&field, "name");
            assert_eq!(field.callbacks.borrow().len(), 1);
        }
        assert!(field.callbacks.borrow().is_empty());
    }
}
