//! In-memory 3D scene and the executor that drives it.
//!
//! The scene is single-threaded state: it is owned by the executor, which is
//! owned by the drain loop on the host thread. No locking is involved.
//!
//! Object names are unique. Adding an object whose name is taken gives it
//! the first free `.001`, `.002`, ... suffix.

mod params;
pub mod render;

use crate::executor::{CommandExecutor, ExecutionError};
use crate::protocol::{Command, Response};
use params::Params;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

pub type Vec3 = [f64; 3];

const ORIGIN: Vec3 = [0.0, 0.0, 0.0];
const UNIT_SCALE: Vec3 = [1.0, 1.0, 1.0];

/// Mesh primitive and its construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Cube { size: f64 },
    Sphere { radius: f64 },
    Plane { size: f64 },
    Cylinder { radius: f64, depth: f64 },
    Cone { radius1: f64, radius2: f64, depth: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Point,
    Sun,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectKind {
    Mesh(Primitive),
    Camera,
    Light { light: LightKind, energy: f64 },
}

impl ObjectKind {
    /// Type tag reported by `list_objects`.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Mesh(_) => "MESH",
            ObjectKind::Camera => "CAMERA",
            ObjectKind::Light { .. } => "LIGHT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub location: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Names of assigned materials, in slot order
    pub materials: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    /// RGBA base color
    pub color: [f64; 4],
}

/// Objects, materials and the active camera.
#[derive(Debug, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    materials: Vec<Material>,
    active_camera: Option<String>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects in creation order.
    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn material(&self, name: &str) -> Option<&Material> {
        self.materials.iter().find(|m| m.name == name)
    }

    pub fn active_camera(&self) -> Option<&str> {
        self.active_camera.as_deref()
    }

    /// Add an object, returning the name it was actually given.
    pub fn add_object(&mut self, base_name: &str, kind: ObjectKind, location: Vec3, rotation: Vec3) -> String {
        let name = unique_name(base_name, |n| self.object(n).is_some());
        debug!(name = %name, kind = kind.type_name(), "Adding object");
        self.objects.push(SceneObject {
            name: name.clone(),
            kind,
            location,
            rotation,
            scale: UNIT_SCALE,
            materials: Vec::new(),
        });
        name
    }

    /// Create a material, returning its unique name.
    pub fn add_material(&mut self, base_name: &str, color: [f64; 4]) -> String {
        let name = unique_name(base_name, |n| self.material(n).is_some());
        self.materials.push(Material {
            name: name.clone(),
            color,
        });
        name
    }

    pub fn remove_object(&mut self, name: &str) -> Option<SceneObject> {
        let index = self.objects.iter().position(|o| o.name == name)?;
        if self.active_camera.as_deref() == Some(name) {
            self.active_camera = None;
        }
        Some(self.objects.remove(index))
    }

    /// Remove every object and material.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.materials.clear();
        self.active_camera = None;
    }
}

fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1u32..)
        .map(|n| format!("{base}.{n:03}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Executes wire commands against a [`Scene`].
#[derive(Debug)]
pub struct SceneExecutor {
    scene: Scene,
    render_dir: PathBuf,
}

impl SceneExecutor {
    pub fn new(render_dir: PathBuf) -> Self {
        info!(render_dir = %render_dir.display(), "Initializing scene");
        Self {
            scene: Scene::new(),
            render_dir,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    fn add_mesh(&mut self, base_name: &str, primitive: Primitive, p: &Params<'_>) -> Result<(), ExecutionError> {
        let location = p.vec3("location", ORIGIN)?;
        let rotation = p.vec3("rotation", ORIGIN)?;
        self.scene
            .add_object(base_name, ObjectKind::Mesh(primitive), location, rotation);
        Ok(())
    }

    fn transform(
        &mut self,
        p: &Params<'_>,
        field: &'static str,
        apply: fn(&mut SceneObject, Vec3),
    ) -> Result<(), ExecutionError> {
        let name = p.required_str("object_name")?;
        let value = p.optional_vec3(field)?;
        let object = self
            .scene
            .object_mut(name)
            .ok_or(ExecutionError::ObjectNotFound)?;
        if let Some(value) = value {
            apply(object, value);
        }
        Ok(())
    }

    fn set_material_color(&mut self, p: &Params<'_>) -> Result<(), ExecutionError> {
        let name = p.required_str("object_name")?;
        let color = p.color("color", [1.0, 1.0, 1.0, 1.0])?;
        let object = self.scene.object(name).ok_or(ExecutionError::ObjectNotFound)?;
        if !matches!(object.kind, ObjectKind::Mesh(_)) {
            return Err(ExecutionError::NoMaterialSlots(name.to_string()));
        }

        let material = self.scene.add_material(&format!("{name}_Mat"), color);
        if let Some(object) = self.scene.object_mut(name) {
            object.materials.push(material);
        }
        Ok(())
    }

    fn render(&mut self, p: &Params<'_>) -> Result<String, ExecutionError> {
        let filepath = match p.string("filepath", "")? {
            path if path.is_empty() => self.render_dir.join("render.ppm"),
            path => PathBuf::from(path),
        };
        let width = p.dimension("width", 320, render::MAX_DIMENSION)?;
        let height = p.dimension("height", 240, render::MAX_DIMENSION)?;

        render::render_to_file(&self.scene, &filepath, width, height)?;
        info!(path = %filepath.display(), width, height, "Rendered scene");
        Ok(filepath.display().to_string())
    }

    fn list_objects(&self) -> Value {
        self.scene
            .objects()
            .iter()
            .map(|o| {
                json!({
                    "name": o.name,
                    "type": o.kind.type_name(),
                    "location": o.location,
                })
            })
            .collect()
    }
}

impl CommandExecutor for SceneExecutor {
    fn execute(&mut self, command: &Command) -> Result<Response, ExecutionError> {
        let p = Params::new(&command.params);

        let message = match command.action.as_str() {
            "add_cube" => {
                let size = p.extent("size", 1.0)?;
                self.add_mesh("Cube", Primitive::Cube { size }, &p)?;
                "Cube added"
            }
            "add_sphere" => {
                let radius = p.extent("radius", 1.0)?;
                self.add_mesh("Sphere", Primitive::Sphere { radius }, &p)?;
                "Sphere added"
            }
            "add_plane" => {
                let size = p.extent("size", 2.0)?;
                self.add_mesh("Plane", Primitive::Plane { size }, &p)?;
                "Plane added"
            }
            "add_cylinder" => {
                let radius = p.extent("radius", 1.0)?;
                let depth = p.extent("depth", 2.0)?;
                self.add_mesh("Cylinder", Primitive::Cylinder { radius, depth }, &p)?;
                "Cylinder added"
            }
            "add_cone" => {
                let radius1 = p.extent("radius1", 1.0)?;
                let radius2 = p.extent("radius2", 0.0)?;
                let depth = p.extent("depth", 2.0)?;
                let cone = Primitive::Cone {
                    radius1,
                    radius2,
                    depth,
                };
                self.add_mesh("Cone", cone, &p)?;
                "Cone added"
            }
            "move_object" => {
                self.transform(&p, "location", |o, v| o.location = v)?;
                "Object moved"
            }
            "rotate_object" => {
                self.transform(&p, "rotation", |o, v| o.rotation = v)?;
                "Object rotated"
            }
            "scale_object" => {
                self.transform(&p, "scale", |o, v| o.scale = v)?;
                "Object scaled"
            }
            "add_camera" => {
                let name = p.string("name", "Camera")?;
                let location = p.vec3("location", [3.0, -3.0, 2.0])?;
                let name = self.scene.add_object(&name, ObjectKind::Camera, location, ORIGIN);
                self.scene.active_camera = Some(name);
                "Camera added"
            }
            "add_point_light" => {
                let name = p.string("name", "PointLight")?;
                let energy = p.number("energy", 1000.0)?;
                let location = p.vec3("location", [0.0, 0.0, 5.0])?;
                let kind = ObjectKind::Light {
                    light: LightKind::Point,
                    energy,
                };
                self.scene.add_object(&name, kind, location, ORIGIN);
                "Point light added"
            }
            "add_sun_light" => {
                let name = p.string("name", "SunLight")?;
                let energy = p.number("strength", 3.0)?;
                let rotation = p.vec3("rotation", ORIGIN)?;
                let kind = ObjectKind::Light {
                    light: LightKind::Sun,
                    energy,
                };
                self.scene.add_object(&name, kind, ORIGIN, rotation);
                "Sun light added"
            }
            "set_material_color" => {
                self.set_material_color(&p)?;
                "Material color set"
            }
            "render" => {
                let path = self.render(&p)?;
                return Ok(Response::ok(format!("Rendered to {path}")));
            }
            "list_objects" => return Ok(Response::ok_with("objects", self.list_objects())),
            "delete_object" => {
                let name = p.required_str("object_name")?;
                self.scene
                    .remove_object(name)
                    .ok_or(ExecutionError::ObjectNotFound)?;
                "Object deleted"
            }
            "clear_scene" => {
                self.scene.clear();
                "Scene cleared"
            }
            other => return Err(ExecutionError::UnknownAction(other.to_string())),
        };

        Ok(Response::ok(message))
    }
}
