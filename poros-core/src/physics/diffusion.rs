//! Steady scalar diffusion on 8-node hexahedra.
//!
//! Solves `div w = 0` with `w = flux(∇φ)` for one scalar field φ (fluid
//! pressure or a solute concentration). Integration runs on the reference
//! geometry.

use super::{check_elements, PhysicsModule, StateView};
use crate::assembly::{evaluate_parallel, scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::dof::{DofBlock, DofKind, EquationMap};
use crate::element::hex8::Hex8;
use crate::error::{Error, Result};
use crate::material::FluxMaterial;
use crate::mesh::{ElementType, Mesh};
use crate::sparse::CompactSymmMatrix;
use crate::types::{Point3, Vec3};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DiffusionDomain {
    name: String,
    elements: Vec<usize>,
    field: DofKind,
    material: Arc<dyn FluxMaterial>,
}

impl DiffusionDomain {
    /// `field` must be [`DofKind::Pressure`] or a concentration.
    pub fn new(mesh: &Mesh, elements: Vec<usize>, field: DofKind, material: Arc<dyn FluxMaterial>) -> Result<Self> {
        check_elements(mesh, &elements, ElementType::Hex8)?;
        if field.block() == DofBlock::Displacement {
            return Err(Error::Config(format!("{:?} is not a scalar diffusion field", field)));
        }
        Ok(Self {
            name: format!("diffusion {:?}", field),
            elements,
            field,
            material,
        })
    }

    fn nodes<'m>(&self, mesh: &'m Mesh, k: usize) -> &'m [usize] {
        &mesh.elements()[self.elements[k]].nodes
    }

    fn coords(&self, mesh: &Mesh, k: usize) -> Vec<Point3> {
        self.nodes(mesh, k).iter().map(|&n| mesh.nodes()[n]).collect()
    }

    fn lm(&self, mesh: &Mesh, eqs: &EquationMap, k: usize) -> Vec<Option<usize>> {
        eqs.lm(self.nodes(mesh, k), &[self.field])
    }

    /// Internal flux vector `-∫ ∇N·w dV` and its tangent.
    fn evaluate(&self, view: &StateView, k: usize, tangent: bool) -> Result<(DVector<f64>, Option<DMatrix<f64>>)> {
        let coords = self.coords(view.mesh, k);
        let phi: Vec<f64> = self.nodes(view.mesh, k).iter().map(|&n| view.value(n, self.field)).collect();
        let mut fe = DVector::zeros(8);
        let mut ke = tangent.then(|| DMatrix::zeros(8, 8));

        for p in Hex8::points(&coords)? {
            let grad: Vec3 = p.grad.iter().zip(&phi).map(|(g, v)| g * *v).sum();
            let (w, dw) = self.material.evaluate(&grad);
            for a in 0..8 {
                fe[a] -= p.grad[a].dot(&w) * p.jw;
            }
            if let Some(ke) = ke.as_mut() {
                for a in 0..8 {
                    let ga = dw.transpose() * p.grad[a];
                    for b in 0..8 {
                        ke[(a, b)] -= ga.dot(&p.grad[b]) * p.jw;
                    }
                }
            }
        }
        Ok((fe, ke))
    }
}

impl PhysicsModule for DiffusionDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn dof_kinds(&self) -> Vec<DofKind> {
        vec![self.field]
    }

    fn location_vectors(&self, mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>> {
        (0..self.elements.len()).map(|k| self.lm(mesh, eqs, k)).collect()
    }

    fn residual(&self, view: &StateView, r: &mut [f64]) -> Result<()> {
        let blocks = evaluate_parallel(self.elements.len(), |k| {
            let (fe, _) = self.evaluate(view, k, false)?;
            Ok(ElementVector {
                lm: self.lm(view.mesh, view.eqs, k),
                fe: -fe,
            })
        })?;
        scatter_vectors(r, &blocks, &self.name)
    }

    fn stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        let blocks = evaluate_parallel(self.elements.len(), |el| {
            let (_, ke) = self.evaluate(view, el, true)?;
            Ok(ElementMatrix {
                lm: self.lm(view.mesh, view.eqs, el),
                ke: ke.unwrap_or_else(|| DMatrix::zeros(8, 8)),
            })
        })?;
        scatter_matrices(k, &blocks, &self.name)
    }

    fn surface_stiffness(&self, mesh: &Mesh, element: usize, facet_area: f64, block: DofBlock) -> Option<f64> {
        if block != self.field.block() {
            return None;
        }
        let k = self.elements.iter().position(|&e| e == element)?;
        let volume = Hex8::volume(&self.coords(mesh, k)).ok()?;
        Some(self.material.conductivity() * facet_area / volume)
    }
}
