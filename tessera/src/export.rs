//! ASCII PLY export of meshes and point clouds.

use ply_rs::{
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::io::{self, Write};
use tessera_core::nalgebra::{Point3, Vector3};
use tessera_core::{Mesh, PointCloud};

fn new_ply() -> Ply<DefaultElement> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push("Exported from tessera".to_string());
    ply
}

fn scalar(name: &str, scalar: ScalarType) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar))
}

/// The `vertex` element with positions and, optionally, normals.
fn vertex_element(
    ply: &mut Ply<DefaultElement>,
    points: &[Point3<f64>],
    normals: Option<&[Vector3<f64>]>,
) {
    let mut element = ElementDef::new("vertex".to_string());
    let names: &[&str] = if normals.is_some() {
        &["x", "y", "z", "nx", "ny", "nz"]
    } else {
        &["x", "y", "z"]
    };
    for name in names {
        element.properties.add(scalar(name, ScalarType::Double));
    }
    ply.header.elements.add(element);

    let vertices = points
        .iter()
        .enumerate()
        .map(|(ix, p)| {
            let mut vertex = DefaultElement::new();
            vertex.insert("x".to_string(), Property::Double(p.x));
            vertex.insert("y".to_string(), Property::Double(p.y));
            vertex.insert("z".to_string(), Property::Double(p.z));
            if let Some(n) = normals.and_then(|normals| normals.get(ix)) {
                vertex.insert("nx".to_string(), Property::Double(n.x));
                vertex.insert("ny".to_string(), Property::Double(n.y));
                vertex.insert("nz".to_string(), Property::Double(n.z));
            }
            vertex
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);
}

/// Writes the mesh with its vertex normals when present and a per-corner `texcoord` list on
/// every face when the mesh carries texture coordinates.
pub fn export_mesh(mut writer: impl Write, mesh: &Mesh) -> io::Result<usize> {
    let mut ply = new_ply();
    let normals = mesh
        .normals
        .as_deref()
        .filter(|normals| normals.len() == mesh.vertices.len());
    vertex_element(&mut ply, &mesh.vertices, normals);

    let textured = mesh.uvs.len() == 3 * mesh.triangle_count();
    let mut face_element = ElementDef::new("face".to_string());
    face_element.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    if textured {
        face_element.properties.add(PropertyDef::new(
            "texcoord".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::Float),
        ));
    }
    ply.header.elements.add(face_element);

    let faces = (0..mesh.triangle_count())
        .map(|t| {
            let mut face = DefaultElement::new();
            let indices = mesh.triangles[t].iter().map(|&v| v as i32).collect();
            face.insert("vertex_indices".to_string(), Property::ListInt(indices));
            if let Some(uvs) = mesh.corner_uvs(t).filter(|_| textured) {
                let coords = uvs
                    .iter()
                    .flat_map(|uv| [uv.x as f32, uv.y as f32])
                    .collect();
                face.insert("texcoord".to_string(), Property::ListFloat(coords));
            }
            face
        })
        .collect();
    ply.payload.insert("face".to_string(), faces);

    Writer::new().write_ply(&mut writer, &mut ply)
}

/// Writes the points of a cloud, with normals when it has them.
pub fn export_point_cloud(mut writer: impl Write, cloud: &PointCloud) -> io::Result<usize> {
    let mut ply = new_ply();
    let normals = cloud
        .normals
        .as_deref()
        .filter(|normals| normals.len() == cloud.points.len());
    vertex_element(&mut ply, &cloud.points, normals);
    Writer::new().write_ply(&mut writer, &mut ply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::nalgebra::Point2;

    fn triangle() -> Mesh {
        let mut mesh = Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        mesh.uvs = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        mesh.recompute_normals();
        mesh
    }

    #[test]
    fn mesh_header_lists_every_property() {
        let mut buffer = Vec::new();
        export_mesh(&mut buffer, &triangle()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("ply\nformat ascii 1.0"));
        assert!(text.contains("element vertex 3"));
        assert!(text.contains("property double nz"));
        assert!(text.contains("element face 1"));
        assert!(text.contains("property list uchar int vertex_indices"));
        assert!(text.contains("property list uchar float texcoord"));
        assert!(text.contains("\n3 0 1 2 6 "));
    }

    #[test]
    fn cloud_without_normals() {
        let cloud = PointCloud::from_points(vec![Point3::new(1.0, 2.0, 3.0)]);
        let mut buffer = Vec::new();
        export_point_cloud(&mut buffer, &cloud).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("element vertex 1"));
        assert!(!text.contains("nx"));
        assert!(text.contains("1 2 3"));
    }
}
