// Game object collision proxies sharing geometry through the manager

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::*;
use mangos_vmap::assembler::write_gameobject_models;
use mangos_vmap::geometry::{AaBox, Ray};
use mangos_vmap::{
    GameObjectModel, GameObjectModelData, GameObjectModelList, GameObjectModelOwner,
    ModelIgnoreFlags, Quat, Vec3, GAMEOBJECT_MODELS,
};

const EPSILON: f32 = 0.01;
const FLOOR_DISPLAY_ID: u32 = 100;
const CRATE_DISPLAY_ID: u32 = 101;
const FLAT_DISPLAY_ID: u32 = 102;

struct TestOwner {
    display_id: u32,
    position: Vec3,
    rotation: Quat,
    scale: f32,
    phase_mask: u32,
    spawned: Arc<AtomicBool>,
}

impl TestOwner {
    fn new(display_id: u32, position: Vec3) -> Self {
        Self {
            display_id,
            position,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            phase_mask: 1,
            spawned: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl GameObjectModelOwner for TestOwner {
    fn display_id(&self) -> u32 {
        self.display_id
    }

    fn name_set_id(&self) -> u8 {
        4
    }

    fn is_spawned(&self) -> bool {
        self.spawned.load(Ordering::Relaxed)
    }

    fn is_in_phase(&self, phase_mask: u32) -> bool {
        self.phase_mask & phase_mask != 0
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn rotation(&self) -> Quat {
        self.rotation
    }

    fn scale(&self) -> f32 {
        self.scale
    }
}

fn model_list(data: &TestData) -> GameObjectModelList {
    let floor_bound = AaBox::new(Vec3::new(-20.0, -20.0, -1.0), Vec3::new(20.0, 20.0, 30.0));
    let records = vec![
        (
            FLOOR_DISPLAY_ID,
            GameObjectModelData {
                name: FLOOR_MODEL.to_string(),
                bound: floor_bound,
                is_wmo: true,
            },
        ),
        (
            CRATE_DISPLAY_ID,
            GameObjectModelData {
                name: FLOOR_MODEL.to_string(),
                bound: floor_bound,
                is_wmo: false,
            },
        ),
        (
            FLAT_DISPLAY_ID,
            GameObjectModelData {
                name: FLOOR_MODEL.to_string(),
                bound: AaBox::ZERO,
                is_wmo: true,
            },
        ),
    ];
    write_gameobject_models(&data.vmaps_dir().join(GAMEOBJECT_MODELS), &records).unwrap();
    GameObjectModelList::load(&data.vmaps_dir())
}

#[test]
fn test_shared_geometry_across_spawns() {
    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);
    assert_eq!(models.len(), 3);

    let first = GameObjectModel::create(
        Box::new(TestOwner::new(FLOOR_DISPLAY_ID, Vec3::ZERO)),
        &models,
        &vmaps,
    )
    .unwrap();
    let second = GameObjectModel::create(
        Box::new(TestOwner::new(FLOOR_DISPLAY_ID, Vec3::new(500.0, 0.0, 0.0))),
        &models,
        &vmaps,
    )
    .unwrap();

    assert!(Arc::ptr_eq(first.model(), second.model()));
    assert_eq!(vmaps.model_cache().ref_count(FLOOR_MODEL), 2);

    drop(first);
    assert_eq!(vmaps.model_cache().ref_count(FLOOR_MODEL), 1);
    drop(second);
    assert!(vmaps.model_cache().is_empty());
}

#[test]
fn test_unknown_or_flat_display() {
    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);

    let unknown = GameObjectModel::create(Box::new(TestOwner::new(9999, Vec3::ZERO)), &models, &vmaps);
    assert!(unknown.is_none());
    let flat = GameObjectModel::create(
        Box::new(TestOwner::new(FLAT_DISPLAY_ID, Vec3::ZERO)),
        &models,
        &vmaps,
    );
    assert!(flat.is_none());
    assert!(vmaps.model_cache().is_empty());
}

#[test]
fn test_ray_and_collision_toggle() {
    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);
    let owner = TestOwner::new(FLOOR_DISPLAY_ID, Vec3::new(10.0, 20.0, 30.0));
    let spawned = Arc::clone(&owner.spawned);
    let mut object = GameObjectModel::create(Box::new(owner), &models, &vmaps).unwrap();

    let ray = Ray::new(Vec3::new(13.0, 18.0, 45.0), Vec3::NEG_Z);
    let mut dist = 100.0;
    assert!(object.intersect_ray(&ray, &mut dist, false, 1, ModelIgnoreFlags::empty()));
    assert!((dist - 15.0).abs() < EPSILON);

    // other phase
    let mut dist = 100.0;
    assert!(!object.intersect_ray(&ray, &mut dist, false, 2, ModelIgnoreFlags::empty()));

    object.enable_collision(false);
    let mut dist = 100.0;
    assert!(!object.intersect_ray(&ray, &mut dist, false, 1, ModelIgnoreFlags::empty()));
    object.enable_collision(true);

    spawned.store(false, Ordering::Relaxed);
    let mut dist = 100.0;
    assert!(!object.intersect_ray(&ray, &mut dist, false, 1, ModelIgnoreFlags::empty()));
}

#[test]
fn test_point_queries_on_map_objects() {
    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);

    let mut owner = TestOwner::new(FLOOR_DISPLAY_ID, Vec3::new(0.0, 0.0, 10.0));
    owner.rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
    owner.scale = 2.0;
    let object = GameObjectModel::create(Box::new(owner), &models, &vmaps).unwrap();
    assert!(object.is_map_object());

    let hit = object.intersect_point(Vec3::new(3.0, -4.0, 20.0), 1).unwrap();
    assert!((hit.floor_z - 10.0).abs() < EPSILON);
    assert_eq!(hit.info.adt_id, 4);
    assert_eq!(hit.info.root_id, FLOOR_ROOT_ID);

    let location = object.get_location_info(Vec3::new(3.0, -4.0, 20.0), 1).unwrap();
    assert!((location.ground_z - 10.0).abs() < EPSILON);
    assert_eq!(location.group_id, FLOOR_GROUP_ID);

    // outside the rotated bound
    assert!(object.intersect_point(Vec3::new(100.0, 0.0, 20.0), 1).is_none());

    // M2 objects carry no area data
    let crate_object = GameObjectModel::create(
        Box::new(TestOwner::new(CRATE_DISPLAY_ID, Vec3::ZERO)),
        &models,
        &vmaps,
    )
    .unwrap();
    assert!(!crate_object.is_map_object());
    assert!(crate_object.intersect_point(Vec3::new(3.0, -4.0, 5.0), 1).is_none());
}

#[test]
fn test_update_position() {
    struct Moving {
        position: Arc<parking_lot::Mutex<Vec3>>,
    }
    impl GameObjectModelOwner for Moving {
        fn display_id(&self) -> u32 {
            FLOOR_DISPLAY_ID
        }
        fn is_spawned(&self) -> bool {
            true
        }
        fn is_in_phase(&self, _phase_mask: u32) -> bool {
            true
        }
        fn position(&self) -> Vec3 {
            *self.position.lock()
        }
        fn rotation(&self) -> Quat {
            Quat::IDENTITY
        }
        fn scale(&self) -> f32 {
            1.0
        }
    }

    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);
    let position = Arc::new(parking_lot::Mutex::new(Vec3::ZERO));
    let owner = Moving {
        position: Arc::clone(&position),
    };
    let mut object = GameObjectModel::create(Box::new(owner), &models, &vmaps).unwrap();
    assert!(object.bound().contains(Vec3::new(5.0, 5.0, 5.0)));

    *position.lock() = Vec3::new(1000.0, 0.0, 0.0);
    object.update_position();
    assert!(!object.bound().contains(Vec3::new(5.0, 5.0, 5.0)));
    assert!(object.bound().contains(Vec3::new(1005.0, 5.0, 5.0)));

    let ray = Ray::new(Vec3::new(1003.0, 2.0, 10.0), Vec3::NEG_Z);
    let mut dist = 50.0;
    assert!(object.intersect_ray(&ray, &mut dist, true, 1, ModelIgnoreFlags::empty()));
    assert!((dist - 10.0).abs() < EPSILON);
}

#[test]
fn test_invalid_scale_has_no_collision() {
    let data = TestData::new();
    let vmaps = data.manager();
    let models = model_list(&data);

    for scale in [0.0, -1.0, f32::NAN, f32::INFINITY] {
        let mut owner = TestOwner::new(FLOOR_DISPLAY_ID, Vec3::ZERO);
        owner.scale = scale;
        assert!(GameObjectModel::create(Box::new(owner), &models, &vmaps).is_none());
    }
    // nothing was acquired on the way out
    assert!(!vmaps.model_cache().contains(FLOOR_MODEL));
}
