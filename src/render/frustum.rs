use glam::{Mat4, Vec3, Vec4};

/// View frustum as six planes extracted from a view-projection matrix,
/// used to cull sub-chunk AABBs before building draw commands.
#[derive(Debug, Clone)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        let m = view_proj.to_cols_array_2d();
        let mut planes = [
            // left, right, bottom, top, near, far
            Vec4::new(
                m[0][3] + m[0][0],
                m[1][3] + m[1][0],
                m[2][3] + m[2][0],
                m[3][3] + m[3][0],
            ),
            Vec4::new(
                m[0][3] - m[0][0],
                m[1][3] - m[1][0],
                m[2][3] - m[2][0],
                m[3][3] - m[3][0],
            ),
            Vec4::new(
                m[0][3] + m[0][1],
                m[1][3] + m[1][1],
                m[2][3] + m[2][1],
                m[3][3] + m[3][1],
            ),
            Vec4::new(
                m[0][3] - m[0][1],
                m[1][3] - m[1][1],
                m[2][3] - m[2][1],
                m[3][3] - m[3][1],
            ),
            Vec4::new(
                m[0][3] + m[0][2],
                m[1][3] + m[1][2],
                m[2][3] + m[2][2],
                m[3][3] + m[3][2],
            ),
            Vec4::new(
                m[0][3] - m[0][2],
                m[1][3] - m[1][2],
                m[2][3] - m[2][2],
                m[3][3] - m[3][2],
            ),
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > 0.0 {
                *plane /= length;
            }
        }
        Self { planes }
    }

    /// Whether any part of the AABB is inside the frustum.
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        for plane in &self.planes {
            let normal = plane.truncate();
            // Farthest corner along the plane normal.
            let farthest = Vec3::new(
                if normal.x > 0.0 { max.x } else { min.x },
                if normal.y > 0.0 { max.y } else { min.y },
                if normal.z > 0.0 { max.z } else { min.z },
            );
            if normal.dot(farthest) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_negative_z() -> Frustum {
        let projection = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 500.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        Frustum::from_view_projection(&(projection * view))
    }

    #[test]
    fn box_in_front_is_visible() {
        let frustum = looking_down_negative_z();
        assert!(frustum.intersects_aabb(
            Vec3::new(-8.0, -8.0, -50.0),
            Vec3::new(8.0, 8.0, -34.0)
        ));
    }

    #[test]
    fn box_behind_is_culled() {
        let frustum = looking_down_negative_z();
        assert!(!frustum.intersects_aabb(
            Vec3::new(-8.0, -8.0, 34.0),
            Vec3::new(8.0, 8.0, 50.0)
        ));
    }

    #[test]
    fn box_beyond_far_plane_is_culled() {
        let frustum = looking_down_negative_z();
        assert!(!frustum.intersects_aabb(
            Vec3::new(-8.0, -8.0, -700.0),
            Vec3::new(8.0, 8.0, -600.0)
        ));
    }

    #[test]
    fn straddling_box_is_visible() {
        let frustum = looking_down_negative_z();
        // Half in front, half behind the near plane.
        assert!(frustum.intersects_aabb(
            Vec3::new(-4.0, -4.0, -4.0),
            Vec3::new(4.0, 4.0, 4.0)
        ));
    }
}
