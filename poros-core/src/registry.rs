//! Named material factories.
//!
//! A [`MaterialRegistry`] is built once at startup and passed by reference
//! to whatever assembles a model. Factories take a [`ParamList`] and return
//! shared evaluators.

use crate::error::{Error, Result};
use crate::material::{FluxMaterial, IsotropicPermeability, Material, SolidMaterial, UniaxialMaterial};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vec3([f64; 3]),
    Text(String),
}

/// Ordered name → value list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamList {
    params: Vec<(String, ParamValue)>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an earlier value.
    pub fn set(&mut self, name: &str, value: ParamValue) {
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Required floating-point parameter; integers are widened.
    pub fn float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(Error::Config(format!("parameter '{}' is not a number: {:?}", name, other))),
            None => Err(Error::Config(format!("missing parameter '{}'", name))),
        }
    }

    /// Optional floating-point parameter.
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64> {
        if self.get(name).is_some() {
            self.float(name)
        } else {
            Ok(default)
        }
    }
}

pub type SolidFactory = fn(&ParamList) -> Result<Arc<dyn SolidMaterial>>;
pub type UniaxialFactory = fn(&ParamList) -> Result<Arc<dyn UniaxialMaterial>>;
pub type FluxFactory = fn(&ParamList) -> Result<Arc<dyn FluxMaterial>>;

/// Material factories by name, one table per evaluator kind.
#[derive(Clone, Default)]
pub struct MaterialRegistry {
    solid: HashMap<String, SolidFactory>,
    uniaxial: HashMap<String, UniaxialFactory>,
    flux: HashMap<String, FluxFactory>,
}

impl std::fmt::Debug for MaterialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialRegistry").field("names", &self.names()).finish()
    }
}

fn isotropic_elastic(params: &ParamList) -> Result<Arc<dyn SolidMaterial>> {
    Ok(Arc::new(Material::new(params.float("E")?, params.float("v")?)?))
}

fn linear_uniaxial(params: &ParamList) -> Result<Arc<dyn UniaxialMaterial>> {
    Ok(Arc::new(Material::new(params.float("E")?, 0.0)?))
}

fn isotropic_permeability(params: &ParamList) -> Result<Arc<dyn FluxMaterial>> {
    Ok(Arc::new(IsotropicPermeability::new(params.float("perm")?)?))
}

fn unknown(kind: &str, name: &str) -> Error {
    Error::InvalidMaterial(format!("no {} material named '{}'", kind, name))
}

impl MaterialRegistry {
    /// Registry holding the built-in evaluators.
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register_solid("isotropic elastic", isotropic_elastic);
        reg.register_uniaxial("linear elastic", linear_uniaxial);
        reg.register_flux("isotropic permeability", isotropic_permeability);
        reg
    }

    /// Register a solid factory. Overwrites an existing name.
    pub fn register_solid(&mut self, name: &str, factory: SolidFactory) {
        self.solid.insert(name.to_string(), factory);
    }

    pub fn register_uniaxial(&mut self, name: &str, factory: UniaxialFactory) {
        self.uniaxial.insert(name.to_string(), factory);
    }

    pub fn register_flux(&mut self, name: &str, factory: FluxFactory) {
        self.flux.insert(name.to_string(), factory);
    }

    pub fn create_solid(&self, name: &str, params: &ParamList) -> Result<Arc<dyn SolidMaterial>> {
        let factory = self.solid.get(name).ok_or_else(|| unknown("solid", name))?;
        factory(params)
    }

    pub fn create_uniaxial(&self, name: &str, params: &ParamList) -> Result<Arc<dyn UniaxialMaterial>> {
        let factory = self.uniaxial.get(name).ok_or_else(|| unknown("uniaxial", name))?;
        factory(params)
    }

    pub fn create_flux(&self, name: &str, params: &ParamList) -> Result<Arc<dyn FluxMaterial>> {
        let factory = self.flux.get(name).ok_or_else(|| unknown("flux", name))?;
        factory(params)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .solid
            .keys()
            .chain(self.uniaxial.keys())
            .chain(self.flux.keys())
            .map(|s| s.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StrainTensor, Vec3};
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_create_evaluators() {
        let reg = MaterialRegistry::with_defaults();
        assert_eq!(reg.names().len(), 3);

        let params = ParamList::new()
            .with("E", ParamValue::Float(200.0))
            .with("v", ParamValue::Float(0.25));
        let solid = reg.create_solid("isotropic elastic", &params).unwrap();
        let (stress, _) = solid.evaluate(&StrainTensor::new([0.001, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert!(stress.0[0] > 0.0);

        let bar = reg
            .create_uniaxial("linear elastic", &ParamList::new().with("E", ParamValue::Int(50)))
            .unwrap();
        assert_relative_eq!(bar.evaluate(0.1).0, 5.0, epsilon = 1e-12);

        let perm = reg
            .create_flux("isotropic permeability", &ParamList::new().with("perm", ParamValue::Float(2.0)))
            .unwrap();
        let (w, _) = perm.evaluate(&Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(w.x, -2.0);
    }

    #[test]
    fn test_bad_parameters_reported() {
        let reg = MaterialRegistry::with_defaults();
        assert!(matches!(
            reg.create_solid("neo-Hookean", &ParamList::new()),
            Err(Error::InvalidMaterial(_))
        ));
        let missing = ParamList::new().with("E", ParamValue::Float(1.0));
        assert!(matches!(reg.create_solid("isotropic elastic", &missing), Err(Error::Config(_))));
        let wrong = missing.with("v", ParamValue::Text("half".into()));
        assert!(matches!(reg.create_solid("isotropic elastic", &wrong), Err(Error::Config(_))));
        let negative = ParamList::new().with("E", ParamValue::Float(-1.0)).with("v", ParamValue::Float(0.3));
        assert!(matches!(
            reg.create_solid("isotropic elastic", &negative),
            Err(Error::InvalidMaterial(_))
        ));
    }

    #[test]
    fn test_set_replaces_and_custom_factories_register() {
        let mut params = ParamList::new().with("E", ParamValue::Float(1.0));
        params.set("E", ParamValue::Float(3.0));
        assert_eq!(params.len(), 1);
        assert_eq!(params.float_or("missing", 7.0).unwrap(), 7.0);

        fn stiff(p: &ParamList) -> Result<Arc<dyn UniaxialMaterial>> {
            Ok(Arc::new(Material::new(10.0 * p.float("E")?, 0.0)?))
        }
        let mut reg = MaterialRegistry::default();
        reg.register_uniaxial("stiff", stiff);
        let m = reg.create_uniaxial("stiff", &params).unwrap();
        assert_relative_eq!(m.evaluate(1.0).1, 30.0);
    }
}
