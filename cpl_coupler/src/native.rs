//! Native model arrays as seen by the coupler.

use std::collections::HashMap;

use crate::grid::{Field2d, Field3d};

/// Named arrays owned by the model core.
///
/// The coupler reads export sources and writes imported fields through
/// this trait; it never keeps references across calls.
pub trait NativeModel {
    /// 2-D array `name`.
    fn array2d(&self, name: &str) -> Option<&Field2d>;

    /// Mutable 2-D array `name`.
    fn array2d_mut(&mut self, name: &str) -> Option<&mut Field2d>;

    /// 3-D array `name`, levels bottom to surface.
    fn array3d(&self, name: &str) -> Option<&Field3d>;
}

/// Map-backed [`NativeModel`] for drivers and tests.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    fields2d: HashMap<String, Field2d>,
    fields3d: HashMap<String, Field3d>,
}

impl ModelState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace 2-D array `name`.
    pub fn insert_2d(&mut self, name: impl Into<String>, field: Field2d) -> &mut Self {
        self.fields2d.insert(name.into(), field);
        self
    }

    /// Add or replace 3-D array `name`.
    pub fn insert_3d(&mut self, name: impl Into<String>, field: Field3d) -> &mut Self {
        self.fields3d.insert(name.into(), field);
        self
    }

    /// Remove 2-D array `name`.
    pub fn remove_2d(&mut self, name: &str) -> Option<Field2d> {
        self.fields2d.remove(name)
    }
}

impl NativeModel for ModelState {
    fn array2d(&self, name: &str) -> Option<&Field2d> {
        self.fields2d.get(name)
    }

    fn array2d_mut(&mut self, name: &str) -> Option<&mut Field2d> {
        self.fields2d.get_mut(name)
    }

    fn array3d(&self, name: &str) -> Option<&Field3d> {
        self.fields3d.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_are_found_by_name() {
        let mut state = ModelState::new();
        state
            .insert_2d("zeta", Field2d::new(0..=3, 0..=3, 1.5))
            .insert_3d("temp", Field3d::new(0..=3, 0..=3, 4, -1.0));

        assert_eq!(state.array2d("zeta").and_then(|f| f.get(2, 2)), Some(1.5));
        assert_eq!(state.array3d("temp").map(Field3d::levels), Some(4));
        assert!(state.array2d("temp").is_none());

        if let Some(zeta) = state.array2d_mut("zeta") {
            zeta[(1, 1)] = 7.0;
        }
        assert_eq!(state.array2d("zeta").map(|f| f[(1, 1)]), Some(7.0));
        assert!(state.remove_2d("zeta").is_some());
        assert!(state.array2d("zeta").is_none());
    }
}
