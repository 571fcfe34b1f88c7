/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

/// A handle returned by every `add_*`/`export_object` registration call
/// (spec.md §6: "Each returns a handle whose disposal removes the
/// registration"). Dropping it runs the removal closure exactly once.
pub struct RegistrationHandle {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl RegistrationHandle {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        RegistrationHandle { remove: Some(Box::new(remove)) }
    }

    /// Removes the registration right away instead of waiting for drop.
    pub fn remove(mut self) {
        if let Some(f) = self.remove.take() {
            f();
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if let Some(f) = self.remove.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn dropping_runs_the_removal_closure() {
        let removed = Arc::new(AtomicBool::new(false));
        let removed_clone = removed.clone();
        {
            let _handle = RegistrationHandle::new(move || removed_clone.store(true, Ordering::SeqCst));
            assert!(!removed.load(Ordering::SeqCst));
        }
        assert!(removed.load(Ordering::SeqCst));
    }

    #[test]
    fn explicit_remove_runs_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = RegistrationHandle::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.remove();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
