//! The render boundary: the only side effect the adapter has outside the
//! process is spawning primitive cuboids.

use nalgebra::Vector3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// A primitive box with a fixed material.
#[derive(Debug, Clone, PartialEq)]
pub struct Cuboid {
    pub name: String,
    pub position: Vector3<f32>,
    pub scale: Vector3<f32>,
    pub material: String,
}

/// Whatever renders the arena.
pub trait Scene: Send {
    fn spawn_cuboid(&mut self, cuboid: Cuboid) -> ObjectId;
}

/// In-memory scene that records what was spawned.
#[derive(Debug, Default)]
pub struct SceneGraph {
    objects: Vec<(ObjectId, Cuboid)>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[(ObjectId, Cuboid)] {
        &self.objects
    }

    pub fn get(&self, id: ObjectId) -> Option<&Cuboid> {
        self.objects.iter().find(|(oid, _)| *oid == id).map(|(_, c)| c)
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Cuboid> + 'a {
        self.objects
            .iter()
            .map(|(_, c)| c)
            .filter(move |c| c.name == name)
    }
}

impl Scene for SceneGraph {
    fn spawn_cuboid(&mut self, cuboid: Cuboid) -> ObjectId {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        tracing::debug!(
            id = id.0,
            name = %cuboid.name,
            x = cuboid.position.x,
            y = cuboid.position.y,
            sx = cuboid.scale.x,
            sy = cuboid.scale.y,
            material = %cuboid.material,
            "spawned cuboid"
        );
        self.objects.push((id, cuboid));
        id
    }
}
