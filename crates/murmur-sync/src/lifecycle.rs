//! Parameter-keyed attachments.
//!
//! Each managed subscription is `Unattached` or `Attached(params)`. Moving to
//! new params always detaches the old handle before the new one is built, so
//! at most one handle per attachment is ever live.

/// Teardown for an attached resource.
pub trait Detach {
    fn detach(self);
}

#[derive(Debug)]
pub enum Attachment<P, H: Detach> {
    Unattached,
    Attached { params: P, handle: H },
}

impl<P, H: Detach> Default for Attachment<P, H> {
    fn default() -> Self {
        Self::Unattached
    }
}

impl<P: PartialEq, H: Detach> Attachment<P, H> {
    pub fn params(&self) -> Option<&P> {
        match self {
            Self::Attached { params, .. } => Some(params),
            Self::Unattached => None,
        }
    }

    pub fn handle(&self) -> Option<&H> {
        match self {
            Self::Attached { handle, .. } => Some(handle),
            Self::Unattached => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached { .. })
    }

    /// Detach whatever is attached, then attach `params`.
    pub fn attach(&mut self, params: P, build: impl FnOnce(&P) -> H) {
        self.detach();
        let handle = build(&params);
        *self = Self::Attached { params, handle };
    }

    pub fn detach(&mut self) {
        if let Self::Attached { handle, .. } = std::mem::take(self) {
            handle.detach();
        }
    }

    /// Move to `params`. Equal params keep the live handle; `None` detaches.
    /// Returns whether anything changed.
    pub fn sync(&mut self, params: Option<P>, build: impl FnOnce(&P) -> H) -> bool {
        if self.params() == params.as_ref() {
            return false;
        }
        match params {
            Some(params) => self.attach(params, build),
            None => self.detach(),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Detach for Probe {
        fn detach(self) {
            self.log.lock().push(format!("detach {}", self.name));
        }
    }

    fn probe(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Probe {
        log.lock().push(format!("attach {name}"));
        Probe {
            name,
            log: log.clone(),
        }
    }

    #[test]
    fn switching_params_detaches_before_attaching() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut slot: Attachment<u32, Probe> = Attachment::default();

        assert!(slot.sync(Some(1), |_| probe("one", &log)));
        assert!(slot.sync(Some(2), |_| probe("two", &log)));

        assert_eq!(
            *log.lock(),
            vec!["attach one", "detach one", "attach two"]
        );
        assert_eq!(slot.params(), Some(&2));
    }

    #[test]
    fn same_params_keep_the_handle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut slot: Attachment<u32, Probe> = Attachment::default();

        slot.sync(Some(7), |_| probe("seven", &log));
        assert!(!slot.sync(Some(7), |_| probe("again", &log)));

        assert_eq!(*log.lock(), vec!["attach seven"]);
    }

    #[test]
    fn none_detaches_and_detach_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut slot: Attachment<u32, Probe> = Attachment::default();

        slot.sync(Some(1), |_| probe("one", &log));
        assert!(slot.sync(None, |_| probe("never", &log)));
        slot.detach();

        assert!(!slot.is_attached());
        assert_eq!(*log.lock(), vec!["attach one", "detach one"]);
    }
}
