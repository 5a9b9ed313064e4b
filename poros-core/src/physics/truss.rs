//! Two-node truss domain.
//!
//! Each member carries axial force only. In the small-displacement form
//! the strain is the projected elongation over the reference length; in
//! the large-deformation form the material sees the logarithmic stretch
//! and returns a Kirchhoff stress, and the tangent picks up the geometric
//! term from the rotating member axis.

use super::{check_elements, PhysicsModule, StateView};
use crate::assembly::{evaluate_parallel, scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::dof::{DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::material::UniaxialMaterial;
use crate::mesh::{ElementType, Mesh};
use crate::sparse::CompactSymmMatrix;
use crate::types::Vec3;
use nalgebra::{DMatrix, DVector, Matrix3};
use std::sync::Arc;

/// Kinematic assumption for the members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrussKinematics {
    /// Reference axis, engineering strain.
    Linear,
    /// Current axis, logarithmic strain.
    #[default]
    Large,
}

#[derive(Debug, Clone)]
pub struct TrussDomain {
    name: String,
    elements: Vec<usize>,
    area: f64,
    material: Arc<dyn UniaxialMaterial>,
    kinematics: TrussKinematics,
}

/// Axial state of one member.
struct Member {
    /// Unit axis.
    e: Vec3,
    /// Axial force.
    force: f64,
    /// Axial stiffness coefficient multiplying e·eᵀ.
    k_axial: f64,
    /// Transverse (geometric) coefficient multiplying I - e·eᵀ.
    k_geo: f64,
}

impl TrussDomain {
    pub fn new(
        mesh: &Mesh,
        elements: Vec<usize>,
        area: f64,
        material: Arc<dyn UniaxialMaterial>,
        kinematics: TrussKinematics,
    ) -> Result<Self> {
        check_elements(mesh, &elements, ElementType::Truss2)?;
        if area <= 0.0 || !area.is_finite() {
            return Err(Error::Mesh(format!("truss cross-section area {} must be positive", area)));
        }
        Ok(Self {
            name: "truss".into(),
            elements,
            area,
            material,
            kinematics,
        })
    }

    fn nodes<'m>(&self, mesh: &'m Mesh, k: usize) -> &'m [usize] {
        &mesh.elements()[self.elements[k]].nodes
    }

    fn member(&self, view: &StateView, k: usize) -> Result<Member> {
        let nodes = self.nodes(view.mesh, k);
        let x0 = view.mesh.nodes();
        let d0 = x0[nodes[1]] - x0[nodes[0]];
        let l0 = d0.norm();
        if l0 <= 0.0 {
            return Err(Error::Mesh(format!("truss element {} has zero length", self.elements[k])));
        }
        let v0 = self.area * l0;

        match self.kinematics {
            TrussKinematics::Linear => {
                let e = d0 / l0;
                let du = view.displacement(nodes[1]) - view.displacement(nodes[0]);
                let (stress, tangent) = self.material.evaluate(e.dot(&du) / l0);
                Ok(Member {
                    e,
                    force: stress * self.area,
                    k_axial: tangent * self.area / l0,
                    k_geo: 0.0,
                })
            }
            TrussKinematics::Large => {
                let d = view.position(nodes[1]) - view.position(nodes[0]);
                let l = d.norm();
                if l <= 0.0 {
                    return Err(Error::NumericalFault(format!(
                        "truss element {} collapsed to zero length",
                        self.elements[k]
                    )));
                }
                let (tau, tangent) = self.material.evaluate((l / l0).ln());
                Ok(Member {
                    e: d / l,
                    force: tau * v0 / l,
                    k_axial: v0 / (l * l) * (tangent - tau),
                    k_geo: v0 / (l * l) * tau,
                })
            }
        }
    }

    fn lm(&self, mesh: &Mesh, eqs: &EquationMap, k: usize) -> Vec<Option<usize>> {
        eqs.lm(self.nodes(mesh, k), &DofKind::DISPLACEMENT)
    }
}

impl PhysicsModule for TrussDomain {
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
            let m = self.member(view, k)?;
            let f = m.e * m.force;
            // -F_int: node 0 is pulled along +e, node 1 along -e
            let fe = DVector::from_iterator(6, f.iter().copied().chain(f.iter().map(|v| -v)));
            Ok(ElementVector {
                lm: self.lm(view.mesh, view.eqs, k),
                fe,
            })
        })?;
        scatter_vectors(r, &blocks, &self.name)
    }

    fn stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        let blocks = evaluate_parallel(self.elements.len(), |el| {
            let m = self.member(view, el)?;
            let eet = m.e * m.e.transpose();
            let kab: Matrix3<f64> = eet * m.k_axial + (Matrix3::identity() - eet) * m.k_geo;
            let mut ke = DMatrix::zeros(6, 6);
            ke.fixed_view_mut::<3, 3>(0, 0).copy_from(&kab);
            ke.fixed_view_mut::<3, 3>(3, 3).copy_from(&kab);
            ke.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-kab));
            ke.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-kab));
            Ok(ElementMatrix {
                lm: self.lm(view.mesh, view.eqs, el),
                ke,
            })
        })?;
        scatter_matrices(k, &blocks, &self.name)
    }
}
