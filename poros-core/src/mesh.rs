//! Mesh topology: nodes, volume elements and named surfaces.
//!
//! The mesh only stores reference geometry and connectivity. Which
//! elements belong to which physics module, and which surfaces pair up in
//! a contact interface, is decided by the caller.

use crate::element::facet::FacetType;
use crate::element::hex8::FACES;
use crate::error::{Error, Result};
use crate::types::Point3;

/// Element connectivity - node indices for an element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementConnectivity {
    pub element_type: ElementType,
    /// Node indices (0-based).
    pub nodes: Vec<usize>,
}

/// Supported volume element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 2-node truss.
    Truss2,
    /// 8-node hexahedron (linear).
    Hex8,
}

impl ElementType {
    /// Number of nodes for this element type.
    pub fn n_nodes(self) -> usize {
        match self {
            ElementType::Truss2 => 2,
            ElementType::Hex8 => 8,
        }
    }
}

/// A surface facet, optionally attached to the volume element it bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceFacet {
    pub facet_type: FacetType,
    pub nodes: Vec<usize>,
    /// Owning volume element, used to estimate contact penalties.
    pub element: Option<usize>,
}

/// An ordered list of facets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surface {
    pub name: String,
    pub facets: Vec<SurfaceFacet>,
}

impl Surface {
    /// Distinct nodes referenced by the surface, ascending.
    pub fn nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self.facets.iter().flat_map(|f| f.nodes.iter().copied()).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Number of integration points over all facets.
    pub fn n_integration_points(&self) -> usize {
        self.facets.iter().map(|f| f.facet_type.gauss_points().len()).sum()
    }
}

/// Finite element mesh.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    nodes: Vec<Point3>,
    elements: Vec<ElementConnectivity>,
    surfaces: Vec<Surface>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the mesh, returning its index.
    pub fn add_node(&mut self, point: Point3) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(point);
        idx
    }

    /// Add multiple nodes at once.
    pub fn add_nodes(&mut self, points: impl IntoIterator<Item = Point3>) {
        self.nodes.extend(points);
    }

    fn check_nodes(&self, nodes: &[usize]) -> Result<()> {
        for &node_idx in nodes {
            if node_idx >= self.nodes.len() {
                return Err(Error::Mesh(format!(
                    "Node index {} out of bounds (mesh has {} nodes)",
                    node_idx,
                    self.nodes.len()
                )));
            }
        }
        Ok(())
    }

    /// Add an element to the mesh.
    pub fn add_element(&mut self, element_type: ElementType, nodes: Vec<usize>) -> Result<usize> {
        if nodes.len() != element_type.n_nodes() {
            return Err(Error::Mesh(format!(
                "Element type {:?} requires {} nodes, got {}",
                element_type,
                element_type.n_nodes(),
                nodes.len()
            )));
        }
        self.check_nodes(&nodes)?;

        let idx = self.elements.len();
        self.elements.push(ElementConnectivity {
            element_type,
            nodes,
        });
        Ok(idx)
    }

    /// Add a surface from explicit facet node lists.
    pub fn add_surface(&mut self, name: &str, facets: Vec<Vec<usize>>) -> Result<usize> {
        let mut list = Vec::with_capacity(facets.len());
        for nodes in facets {
            let facet_type = FacetType::from_nodes(nodes.len()).ok_or_else(|| {
                Error::Mesh(format!("surface facet with {} nodes is not supported", nodes.len()))
            })?;
            self.check_nodes(&nodes)?;
            list.push(SurfaceFacet {
                facet_type,
                nodes,
                element: None,
            });
        }
        Ok(self.push_surface(name, list))
    }

    /// Add a surface made of hexahedron faces, given as (element, local
    /// face) pairs. Face numbering follows [`FACES`].
    pub fn add_face_surface(&mut self, name: &str, faces: &[(usize, usize)]) -> Result<usize> {
        let mut list = Vec::with_capacity(faces.len());
        for &(elem, face) in faces {
            let conn = self
                .elements
                .get(elem)
                .ok_or_else(|| Error::Mesh(format!("element {} does not exist", elem)))?;
            if conn.element_type != ElementType::Hex8 || face >= FACES.len() {
                return Err(Error::Mesh(format!(
                    "element {} has no face {}",
                    elem, face
                )));
            }
            list.push(SurfaceFacet {
                facet_type: FacetType::Quad4,
                nodes: FACES[face].iter().map(|&k| conn.nodes[k]).collect(),
                element: Some(elem),
            });
        }
        Ok(self.push_surface(name, list))
    }

    fn push_surface(&mut self, name: &str, facets: Vec<SurfaceFacet>) -> usize {
        let idx = self.surfaces.len();
        self.surfaces.push(Surface {
            name: name.to_string(),
            facets,
        });
        idx
    }

    /// Number of nodes in the mesh.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of elements in the mesh.
    pub fn n_elements(&self) -> usize {
        self.elements.len()
    }

    /// Reference nodal coordinates.
    pub fn nodes(&self) -> &[Point3] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> Option<&Point3> {
        self.nodes.get(idx)
    }

    pub fn elements(&self) -> &[ElementConnectivity] {
        &self.elements
    }

    pub fn element(&self, idx: usize) -> Option<&ElementConnectivity> {
        self.elements.get(idx)
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn surface(&self, idx: usize) -> Option<&Surface> {
        self.surfaces.get(idx)
    }

    /// Look a surface up by name.
    pub fn surface_by_name(&self, name: &str) -> Option<usize> {
        self.surfaces.iter().position(|s| s.name == name)
    }

    /// Reference coordinates of an element's nodes.
    pub fn element_coords(&self, elem_idx: usize) -> Option<Vec<Point3>> {
        let elem = self.elements.get(elem_idx)?;
        Some(elem.nodes.iter().map(|&i| self.nodes[i]).collect())
    }

    /// Compute mesh bounding box.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        let first = *self.nodes.first()?;
        Some(self.nodes[1..].iter().fold((first, first), |(min, max), p| {
            (min.inf(p), max.sup(p))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn unit_cube_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        for z in [0.0, 1.0] {
            mesh.add_node(Vector3::new(0.0, 0.0, z));
            mesh.add_node(Vector3::new(1.0, 0.0, z));
            mesh.add_node(Vector3::new(1.0, 1.0, z));
            mesh.add_node(Vector3::new(0.0, 1.0, z));
        }
        mesh.add_element(ElementType::Hex8, (0..8).collect()).unwrap();
        mesh
    }

    #[test]
    fn test_invalid_element_node_count() {
        let mut mesh = Mesh::new();
        mesh.add_node(Vector3::new(0.0, 0.0, 0.0));
        mesh.add_node(Vector3::new(1.0, 0.0, 0.0));
        assert!(mesh.add_element(ElementType::Hex8, vec![0, 1]).is_err());
        assert!(mesh.add_element(ElementType::Truss2, vec![0, 1]).is_ok());
    }

    #[test]
    fn test_invalid_node_index() {
        let mut mesh = Mesh::new();
        mesh.add_node(Vector3::new(0.0, 0.0, 0.0));
        assert!(mesh.add_element(ElementType::Truss2, vec![0, 3]).is_err());
        assert!(mesh.add_surface("s", vec![vec![0, 1, 2]]).is_err());
    }

    #[test]
    fn test_face_surface_takes_element_nodes() {
        let mut mesh = unit_cube_mesh();
        let s = mesh.add_face_surface("top", &[(0, 1)]).unwrap();
        let surface = mesh.surface(s).unwrap();
        assert_eq!(surface.facets[0].nodes, vec![4, 5, 6, 7]);
        assert_eq!(surface.facets[0].element, Some(0));
        assert_eq!(surface.n_integration_points(), 4);
        assert_eq!(mesh.surface_by_name("top"), Some(s));
        assert!(mesh.add_face_surface("bad", &[(0, 6)]).is_err());
    }

    #[test]
    fn test_surface_nodes_are_unique() {
        let mut mesh = unit_cube_mesh();
        let s = mesh.add_face_surface("sides", &[(0, 2), (0, 3)]).unwrap();
        assert_eq!(mesh.surface(s).unwrap().nodes(), vec![0, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn test_bounds() {
        let mut mesh = Mesh::new();
        mesh.add_node(Vector3::new(-1.0, -2.0, -3.0));
        mesh.add_node(Vector3::new(1.0, 2.0, 3.0));
        mesh.add_node(Vector3::new(0.0, 0.0, 0.0));

        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Vector3::new(-1.0, -2.0, -3.0));
        assert_eq!(max, Vector3::new(1.0, 2.0, 3.0));
    }
}
