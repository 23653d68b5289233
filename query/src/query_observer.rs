use std::{cell::RefCell, rc::Rc};

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identifies a listener registered on a query or an async controller.
    pub struct ListenerKey;
}

type Listener<S> = Rc<dyn Fn(&S)>;

/// Registry of state listeners.
///
/// Listeners are invoked synchronously, in registration order, after every
/// state transition. A listener may add or remove listeners while running.
pub(crate) struct Listeners<S> {
    listeners: RefCell<SlotMap<ListenerKey, Listener<S>>>,
}

impl<S> Listeners<S> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RefCell::new(SlotMap::with_key()),
        }
    }

    pub(crate) fn add(&self, listener: impl Fn(&S) + 'static) -> ListenerKey {
        self.listeners
            .try_borrow_mut()
            .expect("add_listener borrow_mut")
            .insert(Rc::new(listener))
    }

    pub(crate) fn remove(&self, key: ListenerKey) -> bool {
        self.listeners
            .try_borrow_mut()
            .expect("remove_listener borrow_mut")
            .remove(key)
            .is_some()
    }

    pub(crate) fn clear(&self) {
        self.listeners
            .try_borrow_mut()
            .expect("clear_listeners borrow_mut")
            .clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.try_borrow().expect("len borrow").len()
    }

    pub(crate) fn notify(&self, state: &S) {
        // Release the borrow before running listeners so they can (un)subscribe.
        let listeners = self
            .listeners
            .try_borrow()
            .expect("notify borrow")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(state);
        }
    }
}

/// Handle to a listener registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Removes the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keeps the listener registered for the lifetime of its source.
    pub fn forget(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
