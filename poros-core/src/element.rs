//! Element geometry: shape functions, quadrature and facet kinematics.
//!
//! Nothing here knows about fields or materials; physics modules and
//! contact surfaces build their element contributions on top of it.
//!
//! # Submodules
//!
//! - [`gauss`] - Gauss quadrature rules
//! - [`hex8`] - 8-node hexahedron
//! - [`facet`] - 3- and 4-node surface facets

pub mod facet;
pub mod gauss;
pub mod hex8;

pub use facet::FacetType;
pub use gauss::GaussPoint;
pub use hex8::Hex8;
