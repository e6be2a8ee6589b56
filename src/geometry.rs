//! Voxel-grid description of a reconstructed image set.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Placement of an image volume in patient coordinates: the offset of the
/// first voxel, the voxel spacing in mm, the grid size and the direction
/// cosine matrix (one column per image axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelGridGeometry {
    pub offset: [f32; 3],
    pub spacing: [f32; 3],
    pub size: [u32; 3],
    pub direction: [[f32; 3]; 3],
}

impl VoxelGridGeometry {
    /// Componentwise equality within `tol` (sizes exactly).
    pub fn matches(&self, other: &VoxelGridGeometry, tol: f32) -> bool {
        if self.size != other.size {
            return false;
        }
        for i in 0..3 {
            if (self.offset[i] - other.offset[i]).abs() > tol {
                return false;
            }
            if (self.spacing[i] - other.spacing[i]).abs() > tol {
                return false;
            }
            for j in 0..3 {
                if (self.direction[i][j] - other.direction[i][j]).abs() > tol {
                    return false;
                }
            }
        }
        true
    }
}

/// Reorientation can only change offset and directions; grids must agree.
pub fn can_reorient(src: &VoxelGridGeometry, dst: &VoxelGridGeometry) -> Result<(), GeometryError> {
    if src.size != dst.size {
        return Err(GeometryError::NotReorientable("matrix sizes differ"));
    }
    for i in 0..3 {
        if (src.spacing[i] - dst.spacing[i]).abs() > 1e-4 {
            return Err(GeometryError::NotReorientable("voxel spacings differ"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> VoxelGridGeometry {
        VoxelGridGeometry {
            offset: [1.0, 2.0, 3.0],
            spacing: [1.0, 1.0, 2.0],
            size: [8, 8, 4],
            direction: [[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]],
        }
    }

    #[test]
    fn matching_respects_the_tolerance() {
        let a = grid();
        let mut b = grid();
        b.offset[0] += 5e-5;
        assert!(a.matches(&b, 1e-4));
        b.offset[0] += 1e-3;
        assert!(!a.matches(&b, 1e-4));
    }

    #[test]
    fn reorientation_requires_the_same_grid() {
        let a = grid();
        let mut b = grid();
        b.direction[0][0] = 1.0;
        assert!(can_reorient(&a, &b).is_ok());
        b.size[2] = 8;
        assert!(can_reorient(&a, &b).is_err());
        let mut c = grid();
        c.spacing[2] = 2.5;
        assert!(can_reorient(&a, &c).is_err());
    }
}
