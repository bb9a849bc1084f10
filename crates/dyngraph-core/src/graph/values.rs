//! Value assignment
//!
//! Owned key → value map passed between simulation, optimization and
//! reporting stages. Each stage owns its instance; nothing is global.

use std::collections::BTreeMap;

use nalgebra::{DVector, Vector3};

use super::Key;
use crate::error::{DynamicsError, Result};

/// Mapping from variable key to its numeric value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    map: BTreeMap<Key, DVector<f64>>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value, checking its dimension against the key kind
    pub fn set(&mut self, key: Key, value: DVector<f64>) -> Result<()> {
        if value.len() != key.dim() {
            return Err(DynamicsError::DimensionMismatch {
                key,
                expected: key.dim(),
                got: value.len(),
            });
        }
        self.map.insert(key, value);
        Ok(())
    }

    pub fn set_scalar(&mut self, key: Key, value: f64) -> Result<()> {
        self.set(key, DVector::from_element(1, value))
    }

    pub fn set_vector3(&mut self, key: Key, value: Vector3<f64>) -> Result<()> {
        self.set(key, DVector::from_column_slice(value.as_slice()))
    }

    /// Get a value, failing with `KeyNotFound` if unset
    pub fn get(&self, key: Key) -> Result<&DVector<f64>> {
        self.map.get(&key).ok_or(DynamicsError::KeyNotFound(key))
    }

    pub fn scalar(&self, key: Key) -> Result<f64> {
        Ok(self.get(key)?[0])
    }

    pub fn vector3(&self, key: Key) -> Result<Vector3<f64>> {
        let v = self.get(key)?;
        if v.len() != 3 {
            return Err(DynamicsError::DimensionMismatch { key, expected: 3, got: v.len() });
        }
        Ok(Vector3::new(v[0], v[1], v[2]))
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    pub fn remove(&mut self, key: Key) -> Option<DVector<f64>> {
        self.map.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> {
        self.map.iter()
    }

    /// Overlay every entry of `other`, overwriting existing keys
    pub fn extend_from(&mut self, other: &Values) {
        for (key, value) in other.iter() {
            self.map.insert(*key, value.clone());
        }
    }

    /// Add `delta` to a stored value in place
    pub(crate) fn retract(&mut self, key: Key, delta: &[f64]) -> Result<()> {
        let value = self.map.get_mut(&key).ok_or(DynamicsError::KeyNotFound(key))?;
        for (v, d) in value.iter_mut().zip(delta) {
            *v += d;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_set_and_get() {
        let mut values = Values::new();
        values.set_scalar(Key::joint_angle(0, 0), 0.5).unwrap();
        values.set_vector3(Key::pose(1, 0), Vector3::new(0.1, 1.0, 2.0)).unwrap();

        assert_relative_eq!(values.scalar(Key::joint_angle(0, 0)).unwrap(), 0.5);
        assert_relative_eq!(values.vector3(Key::pose(1, 0)).unwrap().z, 2.0);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let values = Values::new();
        let err = values.scalar(Key::torque(2, 3)).unwrap_err();
        assert!(matches!(err, DynamicsError::KeyNotFound(k) if k == Key::torque(2, 3)));
    }

    #[test]
    fn test_dimension_checked() {
        let mut values = Values::new();
        assert!(values.set_scalar(Key::pose(0, 0), 1.0).is_err());
        assert!(values.set_vector3(Key::joint_vel(0, 0), Vector3::zeros()).is_err());
    }

    #[test]
    fn test_extend_overwrites() {
        let mut a = Values::new();
        a.set_scalar(Key::time(0), 0.0).unwrap();
        let mut b = Values::new();
        b.set_scalar(Key::time(0), 1.0).unwrap();
        b.set_scalar(Key::time(1), 2.0).unwrap();
        a.extend_from(&b);
        assert_relative_eq!(a.scalar(Key::time(0)).unwrap(), 1.0);
        assert_eq!(a.len(), 2);
    }
}
