//! Static planning-scene setup: the tool geometry carried by the arm and the
//! wrist orientation constraint.
//!
//! Both objects are expressed in the end-effector frame and attached once at
//! startup.  They are never updated or detached.

use harvest_types::{
    CollisionObject, OrientationConstraint, Point3, Pose, Quaternion, SolidPrimitive,
    ToolAttachment,
};

pub const CYLINDER_ID: &str = "cylinder1";
pub const BOX_ID: &str = "box1";

/// Cylinder enclosing the gripper, attached to `tool0`.
pub fn tool_cylinder(end_effector_link: &str) -> ToolAttachment {
    ToolAttachment {
        object: CollisionObject {
            id: CYLINDER_ID.to_string(),
            frame_id: end_effector_link.to_string(),
            primitive: SolidPrimitive::Cylinder {
                height: 0.25,
                radius: 0.08,
            },
            pose: Pose::new(Point3::new(0.0, 0.0, 0.103 - 0.135), Quaternion::identity()),
        },
        link: "tool0".to_string(),
        touch_links: vec!["tool0".to_string(), "wrist_3_link".to_string()],
    }
}

/// Box along the second wrist link.
pub fn wrist_box(end_effector_link: &str) -> ToolAttachment {
    ToolAttachment {
        object: CollisionObject {
            id: BOX_ID.to_string(),
            frame_id: end_effector_link.to_string(),
            primitive: SolidPrimitive::Box {
                x: 0.15,
                y: 0.04,
                z: 0.04,
            },
            pose: Pose::new(
                Point3::new(0.0, -0.08, -0.064 - 0.135),
                Quaternion::identity(),
            ),
        },
        link: "wrist_2_link".to_string(),
        touch_links: vec!["wrist_2_link".to_string(), "wrist_3_link".to_string()],
    }
}

/// Both attachments, in the order they are applied.
pub fn tool_attachments(end_effector_link: &str) -> [ToolAttachment; 2] {
    [
        tool_cylinder(end_effector_link),
        wrist_box(end_effector_link),
    ]
}

/// Keeps the second wrist link level (within 0.1 rad) relative to the base
/// during every planned motion.
pub fn wrist_orientation_constraint() -> OrientationConstraint {
    OrientationConstraint {
        link_name: "wrist_2_link".to_string(),
        frame_id: "base_link".to_string(),
        orientation: Quaternion::new(0.0, 0.0, 0.008, 1.0),
        absolute_tolerance: [0.1, 0.1, 0.1],
        weight: 1.0,
    }
}
