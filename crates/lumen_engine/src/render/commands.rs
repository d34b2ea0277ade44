//! Backend-neutral command lists.
//!
//! Render code records [`GpuCommand`]s through a [`CommandRecorder`]; the
//! device translates the closed list into native commands at submit time.

use super::descriptor::DescriptorTable;
use super::device::{BufferHandle, ProgramHandle};
use crate::foundation::math::Mat4;

/// Usage state of a presentation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    /// Owned by the presentation engine
    Presentable,
    /// Bound as the color/depth attachment being drawn into
    Writable,
}

/// Viewport in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
    /// Near depth
    pub min_depth: f32,
    /// Far depth
    pub max_depth: f32,
}

/// Scissor rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// One recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Change a target's usage state
    TransitionTarget {
        /// Target index
        target: u32,
        /// Previous state
        from: TargetState,
        /// New state
        to: TargetState,
    },
    /// Set the viewport
    SetViewport(Viewport),
    /// Set the scissor rectangle
    SetScissor(ScissorRect),
    /// Clear the color attachment
    ClearColor([f32; 4]),
    /// Clear the depth attachment
    ClearDepth(f32),
    /// Bind a program
    BindProgram(ProgramHandle),
    /// Bind a snapshot of a program's resource table
    BindDescriptors {
        /// Program the table belongs to
        program: ProgramHandle,
        /// Table contents at record time
        table: DescriptorTable,
    },
    /// Per-draw world matrix, column major
    PushTransform([f32; 16]),
    /// Bind a vertex buffer
    BindVertexBuffer(BufferHandle),
    /// Bind a 32-bit index buffer
    BindIndexBuffer(BufferHandle),
    /// Indexed draw
    DrawIndexed {
        /// Indices to draw
        index_count: u32,
        /// First index
        first_index: u32,
        /// Added to every index
        vertex_offset: i32,
    },
}

/// Records commands into a frame slot's list
#[derive(Debug)]
pub struct CommandRecorder<'a> {
    commands: &'a mut Vec<GpuCommand>,
}

impl<'a> CommandRecorder<'a> {
    /// Record into `commands`
    pub fn new(commands: &'a mut Vec<GpuCommand>) -> Self {
        Self { commands }
    }

    /// Append a raw command
    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    /// Transition a target between states
    pub fn transition(&mut self, target: u32, from: TargetState, to: TargetState) {
        self.push(GpuCommand::TransitionTarget { target, from, to });
    }

    /// Viewport and scissor covering `width` x `height`
    pub fn set_viewport_and_scissor(&mut self, width: u32, height: u32) {
        self.push(GpuCommand::SetViewport(Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }));
        self.push(GpuCommand::SetScissor(ScissorRect {
            x: 0,
            y: 0,
            width,
            height,
        }));
    }

    /// Clear color and depth
    pub fn clear(&mut self, color: [f32; 4], depth: f32) {
        self.push(GpuCommand::ClearColor(color));
        self.push(GpuCommand::ClearDepth(depth));
    }

    /// Bind a program
    pub fn bind_program(&mut self, program: ProgramHandle) {
        self.push(GpuCommand::BindProgram(program));
    }

    /// Bind a program's resource table
    pub fn bind_descriptors(&mut self, program: ProgramHandle, table: DescriptorTable) {
        self.push(GpuCommand::BindDescriptors { program, table });
    }

    /// Push the world matrix for the next draw
    pub fn push_transform(&mut self, world: &Mat4) {
        let mut columns = [0.0; 16];
        columns.copy_from_slice(world.as_slice());
        self.push(GpuCommand::PushTransform(columns));
    }

    /// Bind vertex and index buffers
    pub fn bind_geometry(&mut self, vertices: BufferHandle, indices: BufferHandle) {
        self.push(GpuCommand::BindVertexBuffer(vertices));
        self.push(GpuCommand::BindIndexBuffer(indices));
    }

    /// Draw `index_count` indices from the start of the bound buffer
    pub fn draw_indexed(&mut self, index_count: u32) {
        self.push(GpuCommand::DrawIndexed {
            index_count,
            first_index: 0,
            vertex_offset: 0,
        });
    }

    /// Commands recorded so far
    pub fn commands(&self) -> &[GpuCommand] {
        self.commands
    }

    /// Number of draw calls recorded so far
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::DrawIndexed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_transform_is_column_major() {
        let mut list = Vec::new();
        let mut recorder = CommandRecorder::new(&mut list);
        let world = Mat4::new_translation(&crate::foundation::math::Vec3::new(1.0, 2.0, 3.0));
        recorder.push_transform(&world);

        match &list[0] {
            GpuCommand::PushTransform(m) => assert_eq!(&m[12..15], &[1.0, 2.0, 3.0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn draw_count_only_counts_draws() {
        let mut list = Vec::new();
        let mut recorder = CommandRecorder::new(&mut list);
        recorder.clear([0.0; 4], 1.0);
        recorder.bind_geometry(BufferHandle(1), BufferHandle(2));
        recorder.draw_indexed(6);
        recorder.draw_indexed(3);
        assert_eq!(recorder.draw_count(), 2);
        assert_eq!(recorder.commands().len(), 6);
    }
}
