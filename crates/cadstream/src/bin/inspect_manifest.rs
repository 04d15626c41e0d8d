//! Summarise a sector manifest and what the default budget would load.
//!
//! Run: `cargo run -p cadstream --features test-tools --bin inspect_manifest -- <scene.json>`
//!
//! Prints tree statistics, the total cost of each level of detail, and the
//! result of one cull and budget pass from a camera looking at the model.

use std::collections::BTreeMap;
use std::env;
use std::fs;

use cadstream::{
    Budget, CadBudget, CameraState, DetermineSectorsInput, FrustumSectorCuller, LevelOfDetail,
    ModelId, SectorCost, SectorCuller, SectorScene, parse_manifest_str,
};
use glam::{DMat4, DVec3};

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: inspect_manifest <scene.json>");
        std::process::exit(2);
    };

    let scene = match fs::read_to_string(path)
        .map_err(cadstream::Error::from)
        .and_then(|json| parse_manifest_str(&json))
    {
        Ok(scene) => scene,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            std::process::exit(1);
        }
    };

    print_tree(&scene);
    print_costs(&scene);
    print_first_pass(&scene);
}

fn print_tree(scene: &SectorScene) {
    println!("=== Scene ===");
    println!("Version: {}", scene.version());
    println!("Unit: {}", scene.unit());
    println!("Sectors: {}", scene.len());
    println!("Max depth: {}", scene.max_depth());
    println!("Max tree index: {}", scene.max_tree_index());
    if let Some(root) = scene.root() {
        let size = root.bounds.size();
        println!(
            "Root bounds: {:.1} x {:.1} x {:.1} (diagonal {:.1})",
            size.x,
            size.y,
            size.z,
            root.bounds.diagonal()
        );
    }

    let mut per_depth: BTreeMap<u32, usize> = BTreeMap::new();
    for sector in scene.sectors() {
        *per_depth.entry(sector.depth).or_default() += 1;
    }
    for (depth, count) in per_depth {
        println!("  depth {depth:>2}: {count} sectors");
    }
    println!();
}

fn print_costs(scene: &SectorScene) {
    println!("=== Costs ===");
    for lod in [LevelOfDetail::Simple, LevelOfDetail::Detailed] {
        let (count, total) = scene
            .sectors()
            .filter_map(|sector| scene.cost(sector.id, lod))
            .fold((0usize, SectorCost::ZERO), |(n, sum), cost| (n + 1, sum + cost));
        println!(
            "{lod}: {count} sectors, {} bytes, {} draw calls",
            total.download_size, total.draw_calls
        );
    }
    println!();
}

fn print_first_pass(scene: &SectorScene) {
    let Some(root) = scene.root() else {
        println!("Empty scene, nothing to cull");
        return;
    };
    let center = root.bounds.center();
    let eye = center + DVec3::new(0.0, 0.5, 1.0) * root.bounds.diagonal();
    let camera = CameraState {
        far: root.bounds.diagonal() * 4.0,
        ..CameraState::looking_at(eye, center)
    };

    let candidates = FrustumSectorCuller::default().determine_sectors(&DetermineSectorsInput {
        camera: &camera,
        scene,
        model: ModelId::new(0, 0),
        model_matrix: DMat4::IDENTITY,
        loaded: &(),
        clipping_planes: &[],
    });
    let decision = CadBudget::new(Budget::DEFAULT).filter(&candidates, &[]);

    println!("=== First pass (default budget) ===");
    println!("Camera at {eye:.1} looking at {center:.1}");
    println!("Candidates: {}", candidates.len());
    println!(
        "Accepted: {} ({} bytes, {} draw calls)",
        decision.spent.accepted, decision.spent.cost.download_size, decision.spent.cost.draw_calls
    );
    println!("Dropped: {}", decision.spent.dropped);
    for candidate in decision.accepted.iter().take(10) {
        println!(
            "  sector {:>6} depth {:>2} {:<8} priority {:.3}",
            candidate.sector_id.0,
            candidate.depth,
            candidate.lod.to_string(),
            candidate.priority
        );
    }
}
