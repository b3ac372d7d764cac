use crate::graph::resources::TextureResource;
use crate::graph::{RecordedPass, TextureHandle};
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::{debug, warn};

/// Execution plan derived from the recorded passes.
#[derive(Debug, Clone, Default)]
pub struct CompiledGraph {
    order: Vec<usize>,
    culled: Vec<usize>,
    dependencies: Vec<Vec<usize>>,
    lifetimes: Vec<Option<(usize, usize)>>,
    allocations: Vec<Vec<TextureHandle>>,
    releases: Vec<Vec<TextureHandle>>,
}

impl CompiledGraph {
    pub(crate) fn new(textures: &[TextureResource], passes: &[RecordedPass]) -> Self {
        let dependencies = Self::dependencies_of(textures.len(), passes);
        let alive = Self::alive_passes(textures, passes);

        let culled = (0..passes.len()).filter(|&i| !alive[i]).collect_vec();
        for &i in &culled {
            debug!("Culled pass {:?}, nothing consumes its output", passes[i].name);
        }

        let order = Self::topological_order(&dependencies, &alive);

        let mut lifetimes: Vec<Option<(usize, usize)>> = vec![None; textures.len()];
        for (step, &pass) in order.iter().enumerate() {
            for access in &passes[pass].accesses {
                let slot = &mut lifetimes[access.handle.index()];
                *slot = match *slot {
                    None => Some((step, step)),
                    Some((first, _)) => Some((first, step)),
                };
            }
        }

        let mut allocations = vec![Vec::new(); order.len()];
        let mut releases = vec![Vec::new(); order.len()];
        for (index, texture) in textures.iter().enumerate() {
            if texture.is_imported() {
                continue;
            }
            if let Some((first, last)) = lifetimes[index] {
                let handle = TextureHandle(index as u32);
                allocations[first].push(handle);
                releases[last].push(handle);
            }
        }

        Self::warn_uninitialized_reads(textures, passes, &order);

        Self {
            order,
            culled,
            dependencies,
            lifetimes,
            allocations,
            releases,
        }
    }

    /// Read-after-write, write-after-write and write-after-read edges, per pass.
    fn dependencies_of(texture_count: usize, passes: &[RecordedPass]) -> Vec<Vec<usize>> {
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); passes.len()];
        let mut last_writer: Vec<Option<usize>> = vec![None; texture_count];
        let mut readers: Vec<Vec<usize>> = vec![Vec::new(); texture_count];

        for (index, pass) in passes.iter().enumerate() {
            let deps = &mut dependencies[index];

            for access in &pass.accesses {
                let texture = access.handle.index();

                if let Some(writer) = last_writer[texture] {
                    deps.push(writer);
                }
                if access.access.writes() {
                    deps.extend(readers[texture].iter().copied().filter(|&r| r != index));
                }
            }

            deps.sort_unstable();
            deps.dedup();

            for access in &pass.accesses {
                let texture = access.handle.index();
                if access.access.writes() {
                    last_writer[texture] = Some(index);
                    readers[texture].clear();
                } else {
                    readers[texture].push(index);
                }
            }
        }

        dependencies
    }

    fn alive_passes(textures: &[TextureResource], passes: &[RecordedPass]) -> Vec<bool> {
        let mut alive = vec![false; passes.len()];
        let mut needed = vec![false; textures.len()];

        for (index, pass) in passes.iter().enumerate().rev() {
            let is_alive = !pass.allow_culling
                || pass.accesses.iter().any(|a| {
                    a.access.writes()
                        && (textures[a.handle.index()].is_imported() || needed[a.handle.index()])
                });

            if is_alive {
                alive[index] = true;
                for access in pass.accesses.iter().filter(|a| a.access.reads()) {
                    needed[access.handle.index()] = true;
                }
            }
        }

        alive
    }

    /// Kahn's algorithm; among ready passes the earliest recorded one runs first.
    fn topological_order(dependencies: &[Vec<usize>], alive: &[bool]) -> Vec<usize> {
        let mut remaining = vec![0usize; dependencies.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); dependencies.len()];

        for (pass, deps) in dependencies.iter().enumerate() {
            if !alive[pass] {
                continue;
            }
            for &dep in deps.iter().filter(|&&d| alive[d]) {
                remaining[pass] += 1;
                dependents[dep].push(pass);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..dependencies.len())
            .filter(|&p| alive[p] && remaining[p] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(dependencies.len());
        while let Some(Reverse(pass)) = ready.pop() {
            order.push(pass);
            for &next in &dependents[pass] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        order
    }

    fn warn_uninitialized_reads(
        textures: &[TextureResource],
        passes: &[RecordedPass],
        order: &[usize],
    ) {
        let mut written = textures.iter().map(TextureResource::is_imported).collect_vec();

        for &pass in order {
            for access in &passes[pass].accesses {
                let texture = access.handle.index();
                if access.access.reads() && !written[texture] {
                    warn!(
                        "Pass {:?} reads {:?} before anything wrote it",
                        passes[pass].name, textures[texture].desc.name
                    );
                }
            }
            for access in passes[pass].accesses.iter().filter(|a| a.access.writes()) {
                written[access.handle.index()] = true;
            }
        }
    }

    /// Pass indices in execution order, culled passes excluded.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn culled(&self) -> &[usize] {
        &self.culled
    }

    pub fn dependencies(&self, pass: usize) -> &[usize] {
        self.dependencies.get(pass).map(Vec::as_slice).unwrap_or_default()
    }

    /// First and last execution step touching `handle`.
    pub fn lifetime(&self, handle: TextureHandle) -> Option<(usize, usize)> {
        self.lifetimes.get(handle.index()).copied().flatten()
    }

    pub fn allocations_at(&self, step: usize) -> &[TextureHandle] {
        self.allocations.get(step).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn releases_at(&self, step: usize) -> &[TextureHandle] {
        self.releases.get(step).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{
        AccessFlags, ExternalTextureId, RasterGraphContext, RenderGraph, TextureDesc,
    };
    use glamx::Vec2;
    use wgpu::TextureFormat;

    fn noop(_: &(), _: &mut RasterGraphContext<'_>) {}

    fn desc(name: &str) -> TextureDesc {
        TextureDesc::new(name, 8, 8, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn copy_back_depends_on_the_scratch_write() {
        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(desc("Camera"), ExternalTextureId(1));
        let scratch = graph.create_texture(desc("Scratch"));

        graph
            .add_raster_render_pass("Write", (), |builder| {
                builder.set_render_attachment(scratch, 0, AccessFlags::Write)?;
                builder.use_texture(camera, AccessFlags::Read)?;
                builder.set_render_func(noop);
                Ok(())
            })
            .unwrap();
        graph
            .add_blit_pass(scratch, camera, Vec2::ONE, Vec2::ZERO, "CopyBack")
            .unwrap();

        let compiled = graph.compile();
        assert_eq!(compiled.order(), &[0, 1]);
        assert!(compiled.culled().is_empty());
        // read-after-write on scratch plus write-after-read on camera
        assert_eq!(compiled.dependencies(1), &[0]);
        assert_eq!(compiled.lifetime(scratch), Some((0, 1)));
        assert_eq!(compiled.allocations_at(0), &[scratch]);
        assert_eq!(compiled.releases_at(1), &[scratch]);
        assert!(compiled.allocations_at(1).is_empty());
    }

    #[test]
    fn passes_without_consumers_are_culled() {
        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(desc("Camera"), ExternalTextureId(1));
        let orphan = graph.create_texture(desc("Orphan"));

        graph
            .add_raster_render_pass("Orphaned", (), |builder| {
                builder.set_render_attachment(orphan, 0, AccessFlags::Write)?;
                builder.use_texture(camera, AccessFlags::Read)?;
                builder.set_render_func(noop);
                Ok(())
            })
            .unwrap();
        graph
            .add_raster_render_pass("Pinned", (), |builder| {
                builder.set_render_attachment(orphan, 0, AccessFlags::Write)?;
                builder.allow_pass_culling(false);
                builder.set_render_func(noop);
                Ok(())
            })
            .unwrap();

        let compiled = graph.compile();
        assert_eq!(compiled.order(), &[1]);
        assert_eq!(compiled.culled(), &[0]);
        assert_eq!(compiled.lifetime(orphan), Some((0, 0)));
    }

    #[test]
    fn independent_chains_keep_recording_order() {
        let mut graph = RenderGraph::new();
        let a = graph.import_texture(desc("A"), ExternalTextureId(1));
        let b = graph.import_texture(desc("B"), ExternalTextureId(2));
        let tmp_a = graph.create_texture(desc("TmpA"));
        let tmp_b = graph.create_texture(desc("TmpB"));

        graph
            .add_blit_pass(a, tmp_a, Vec2::ONE, Vec2::ZERO, "A to Tmp")
            .unwrap();
        graph
            .add_blit_pass(b, tmp_b, Vec2::ONE, Vec2::ZERO, "B to Tmp")
            .unwrap();
        graph
            .add_blit_pass(tmp_b, b, Vec2::ONE, Vec2::ZERO, "Tmp to B")
            .unwrap();
        graph
            .add_blit_pass(tmp_a, a, Vec2::ONE, Vec2::ZERO, "Tmp to A")
            .unwrap();

        let compiled = graph.compile();
        assert_eq!(compiled.order(), &[0, 1, 2, 3]);
        assert_eq!(compiled.dependencies(3), &[0]);
        assert_eq!(compiled.dependencies(2), &[1]);
    }
}
