//! Indexed triangle meshes.
//!
//! A [`Mesh`] draws with the [`ShaderBinding`] and [`TextureBinding`]
//! attached to the same node, so those must be attached first.

use std::sync::Arc;

use super::device::{BufferHandle, BufferUsage};
use super::shader::{ShaderBinding, ShaderProgram};
use super::texture::{GpuTexture, TextureBinding};
use super::vertex::Vertex;
use crate::core::context::EngineContext;
use crate::scene::behavior::{Behavior, BehaviorError, BehaviorResult, BehaviorSet, InitContext, RenderContext};
use crate::scene::graph::{SceneGraph, SceneResult};
use crate::scene::node::NodeId;

/// Texture slot meshes bind their texture into
const TEXTURE_SLOT: u32 = 0;

#[derive(Debug, Clone, Copy)]
struct GeometryBuffers {
    vertices: BufferHandle,
    indices: BufferHandle,
}

/// Vertex and index data plus the device buffers created from them
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    buffers: Option<GeometryBuffers>,
}

impl Mesh {
    /// Mesh from raw triangle-list data; uploaded when attached to a node
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            buffers: None,
        }
    }

    /// Unit square in the XY plane facing +Z, white, with full UV coverage
    pub fn quad() -> Self {
        let white = [1.0; 3];
        let normal = [0.0, 0.0, 1.0];
        Self::new(
            vec![
                Vertex::new([-0.5, -0.5, 0.0], white, normal, [0.0, 1.0]),
                Vertex::new([0.5, -0.5, 0.0], white, normal, [1.0, 1.0]),
                Vertex::new([0.5, 0.5, 0.0], white, normal, [1.0, 0.0]),
                Vertex::new([-0.5, 0.5, 0.0], white, normal, [0.0, 0.0]),
            ],
            vec![2, 1, 0, 3, 2, 0],
        )
    }

    /// Vertex data
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Index data
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Whether device buffers exist
    pub fn is_uploaded(&self) -> bool {
        self.buffers.is_some()
    }

    fn validate(&self) -> BehaviorResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(BehaviorError::InvalidGeometry(format!(
                "{} vertices, {} indices",
                self.vertices.len(),
                self.indices.len()
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(BehaviorError::InvalidGeometry(format!(
                "{} indices do not form whole triangles",
                self.indices.len()
            )));
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            return Err(BehaviorError::InvalidGeometry(format!(
                "index {} out of range for {} vertices",
                index,
                self.vertices.len()
            )));
        }
        Ok(())
    }
}

fn bindings<'s>(siblings: &'s BehaviorSet, node: &str) -> BehaviorResult<(&'s ShaderBinding, &'s TextureBinding)> {
    let shader = siblings.get::<ShaderBinding>().ok_or_else(|| BehaviorError::MissingSibling {
        behavior: "Mesh",
        required: "ShaderBinding",
        node: node.to_string(),
    })?;
    let texture = siblings.get::<TextureBinding>().ok_or_else(|| BehaviorError::MissingSibling {
        behavior: "Mesh",
        required: "TextureBinding",
        node: node.to_string(),
    })?;
    Ok((shader, texture))
}

impl Behavior for Mesh {
    fn kind_name(&self) -> &'static str {
        "Mesh"
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> BehaviorResult<()> {
        let (shader, texture) = bindings(ctx.siblings, ctx.node_name)?;
        self.validate()?;

        shader
            .program()
            .bind_texture(ctx.engine, TEXTURE_SLOT, texture.texture(), texture.filter())?;

        let device = ctx.engine.device();
        let vertices = device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&self.vertices))?;
        let indices = match device.create_buffer(BufferUsage::Index, bytemuck::cast_slice(&self.indices)) {
            Ok(indices) => indices,
            Err(e) => {
                device.destroy_buffer(vertices);
                return Err(e.into());
            }
        };
        self.buffers = Some(GeometryBuffers { vertices, indices });

        log::debug!(
            "Uploaded mesh on '{}': {} vertices, {} indices",
            ctx.node_name,
            self.vertices.len(),
            self.indices.len()
        );
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_, '_>) -> BehaviorResult<()> {
        let buffers = self.buffers.ok_or(BehaviorError::NotInitialized("Mesh"))?;
        let (shader, texture) = bindings(ctx.siblings, &format!("{:?}", ctx.node))?;
        let program = shader.program();

        // Programs are shared, so the table may hold another node's texture
        program.bind_texture(ctx.engine, TEXTURE_SLOT, texture.texture(), texture.filter())?;
        program.record_bind(ctx.engine, ctx.recorder)?;
        ctx.recorder.push_transform(ctx.world);
        ctx.recorder.bind_geometry(buffers.vertices, buffers.indices);
        ctx.recorder.draw_indexed(self.indices.len() as u32);
        Ok(())
    }

    fn clean_up(&mut self, engine: &EngineContext) {
        if let Some(buffers) = self.buffers.take() {
            let device = engine.device();
            device.destroy_buffer(buffers.vertices);
            device.destroy_buffer(buffers.indices);
        }
    }
}

/// Create a node drawing `mesh` with `shader` and `texture`.
///
/// On failure the half-built node is destroyed again.
pub fn spawn_textured_mesh(
    scene: &mut SceneGraph,
    name: &str,
    shader: Arc<ShaderProgram>,
    texture: Arc<GpuTexture>,
    mesh: Mesh,
) -> SceneResult<NodeId> {
    let id = scene.create_node(name)?;
    let attached = scene
        .add_behavior(id, ShaderBinding::new(shader))
        .and_then(|()| scene.add_behavior(id, TextureBinding::new(texture)))
        .and_then(|()| scene.add_behavior(id, mesh));

    if let Err(e) = attached {
        scene.destroy_node(id)?;
        return Err(e);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::commands::{CommandRecorder, GpuCommand};
    use crate::render::descriptor::{Binding, ResourceLayout};
    use crate::scene::graph::SceneError;
    use crate::test_support::headless_engine;

    fn scene() -> (Arc<crate::render::headless::HeadlessDevice>, SceneGraph, Arc<ShaderProgram>, Arc<GpuTexture>) {
        let (device, engine) = headless_engine();
        let shader = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        let texture = engine.load_texture("test", "Texture/Test").unwrap();
        (device, SceneGraph::new(engine), shader, texture)
    }

    #[test]
    fn quad_matches_the_demo_square() {
        let quad = Mesh::quad();
        assert_eq!(quad.vertices().len(), 4);
        assert_eq!(quad.indices(), &[2, 1, 0, 3, 2, 0]);
        assert!(quad.validate().is_ok());
    }

    #[test]
    fn mesh_without_shader_sibling_fails_to_initialize() {
        let (_device, mut scene, _shader, texture) = scene();
        let id = scene.create_node("lonely").unwrap();
        scene.add_behavior(id, TextureBinding::new(texture)).unwrap();

        let err = scene.add_behavior(id, Mesh::quad()).unwrap_err();
        assert!(matches!(
            err,
            SceneError::Behavior {
                source: BehaviorError::MissingSibling { required: "ShaderBinding", .. },
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let (_device, mut scene, shader, texture) = scene();
        let mesh = Mesh::new(Mesh::quad().vertices().to_vec(), vec![0, 1, 4]);
        let err = spawn_textured_mesh(&mut scene, "broken", shader, texture, mesh).unwrap_err();
        assert!(matches!(
            err,
            SceneError::Behavior {
                source: BehaviorError::InvalidGeometry(_),
                ..
            }
        ));
        assert!(scene.find("broken").is_none());
    }

    #[test]
    fn render_records_bind_push_and_draw_in_order() {
        let (device, mut scene, shader, texture) = scene();
        let id = spawn_textured_mesh(&mut scene, "quad", shader.clone(), texture.clone(), Mesh::quad()).unwrap();
        scene.set_position(id, Vec3::new(0.0, 0.0, 1.0)).unwrap();
        scene.resolve_all();

        let mut list = Vec::new();
        let mut recorder = CommandRecorder::new(&mut list);
        scene.render(&mut recorder).unwrap();
        assert_eq!(recorder.draw_count(), 1);
        drop(recorder);

        assert_eq!(list[0], GpuCommand::BindProgram(shader.handle()));
        let GpuCommand::BindDescriptors { table, .. } = &list[1] else {
            panic!("expected descriptor bind, got {:?}", list[1]);
        };
        assert_eq!(table.get(0), Some(Binding::ShaderResource(texture.handle())));
        let GpuCommand::PushTransform(columns) = list[2] else {
            panic!("expected transform push, got {:?}", list[2]);
        };
        assert_eq!(columns[14], 1.0);
        assert!(matches!(list[3], GpuCommand::BindVertexBuffer(_)));
        assert!(matches!(list[4], GpuCommand::BindIndexBuffer(_)));
        assert_eq!(
            list[5],
            GpuCommand::DrawIndexed {
                index_count: 6,
                first_index: 0,
                vertex_offset: 0,
            }
        );

        let mesh = scene.behavior::<Mesh>(id).unwrap();
        assert!(mesh.is_uploaded());
        let (_, buffers, _) = device.live_resources();
        assert_eq!(buffers, 2);

        scene.destroy_node(id).unwrap();
        assert_eq!(device.live_resources().1, 0);
    }
}
