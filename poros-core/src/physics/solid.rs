//! Small-strain solid domain on 8-node hexahedra.

use super::{check_elements, PhysicsModule, StateView};
use crate::assembly::{evaluate_parallel, scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::dof::{DofBlock, DofKind, EquationMap};
use crate::element::hex8::Hex8;
use crate::error::{Error, Result};
use crate::material::SolidMaterial;
use crate::mesh::{ElementType, Mesh};
use crate::sparse::CompactSymmMatrix;
use crate::types::{Point3, StrainTensor};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SolidDomain {
    name: String,
    elements: Vec<usize>,
    material: Arc<dyn SolidMaterial>,
}

impl SolidDomain {
    pub fn new(mesh: &Mesh, elements: Vec<usize>, material: Arc<dyn SolidMaterial>) -> Result<Self> {
        check_elements(mesh, &elements, ElementType::Hex8)?;
        Ok(Self {
            name: "solid".into(),
            elements,
            material,
        })
    }

    pub fn elements(&self) -> &[usize] {
        &self.elements
    }

    fn coords(&self, mesh: &Mesh, k: usize) -> Vec<Point3> {
        mesh.elements()[self.elements[k]].nodes.iter().map(|&n| mesh.nodes()[n]).collect()
    }

    fn lm(&self, mesh: &Mesh, eqs: &EquationMap, k: usize) -> Vec<Option<usize>> {
        eqs.lm(&mesh.elements()[self.elements[k]].nodes, &DofKind::DISPLACEMENT)
    }

    fn element_displacements(&self, view: &StateView, k: usize) -> DVector<f64> {
        let nodes = &view.mesh.elements()[self.elements[k]].nodes;
        DVector::from_iterator(
            24,
            nodes.iter().flat_map(|&n| {
                let d = view.displacement(n);
                [d.x, d.y, d.z]
            }),
        )
    }

    /// Internal force and, when requested, tangent of element `k`.
    fn evaluate(&self, view: &StateView, k: usize, tangent: bool) -> Result<(DVector<f64>, Option<DMatrix<f64>>)> {
        let coords = self.coords(view.mesh, k);
        let u = self.element_displacements(view, k);
        let mut fe = DVector::zeros(24);
        let mut ke = tangent.then(|| DMatrix::zeros(24, 24));

        for p in Hex8::points(&coords)? {
            let b = Hex8::b_matrix(&p.grad);
            let eps = &b * &u;
            let strain = StrainTensor::new([eps[0], eps[1], eps[2], eps[3], eps[4], eps[5]]);
            let (stress, d) = self.material.evaluate(&strain);
            if !stress.is_finite() {
                return Err(Error::NumericalFault(format!(
                    "non-finite stress in element {}",
                    self.elements[k]
                )));
            }
            let sigma = DVector::from_column_slice(stress.0.as_slice());
            fe += b.transpose() * sigma * p.jw;
            if let Some(ke) = ke.as_mut() {
                let d = DMatrix::from_column_slice(6, 6, d.as_slice());
                *ke += b.transpose() * d * &b * p.jw;
            }
        }
        Ok((fe, ke))
    }
}

impl PhysicsModule for SolidDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn dof_kinds(&self) -> Vec<DofKind> {
        DofKind::DISPLACEMENT.to_vec()
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
                ke: ke.unwrap_or_else(|| DMatrix::zeros(24, 24)),
            })
        })?;
        scatter_matrices(k, &blocks, &self.name)
    }

    fn surface_stiffness(&self, mesh: &Mesh, element: usize, facet_area: f64, block: DofBlock) -> Option<f64> {
        if block != DofBlock::Displacement {
            return None;
        }
        let k = self.elements.iter().position(|&e| e == element)?;
        let volume = Hex8::volume(&self.coords(mesh, k)).ok()?;
        Some(self.material.bulk_modulus() * facet_area / volume)
    }
}
