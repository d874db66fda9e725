use argh::FromArgs;
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;

use kornia_sfm::io::ply::read_ply_points;
use kornia_sfm::{reconstruction_error, synthetic, ResolverConfig, TomasiKanade};

#[derive(FromArgs)]
/// Reconstruct an object from simulated orthographic views
struct Args {
    /// path to a PLY file with the object, a tetrahedron is used if missing
    #[argh(option)]
    ply_path: Option<PathBuf>,

    /// number of simulated views
    #[argh(option, default = "128")]
    num_views: usize,

    /// keep every n-th vertex of the object
    #[argh(option, default = "20")]
    stride: usize,

    /// standard deviation of the image noise
    #[argh(option, default = "0.0")]
    noise_std: f64,

    /// seed of the random generator
    #[argh(option, default = "1234")]
    seed: u64,

    /// path to a JSON file with the resolver configuration
    #[argh(option)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let object = match &args.ply_path {
        Some(path) => {
            let points = read_ply_points(path)?;
            println!("Read #{} points from {}", points.len(), path.display());
            synthetic::subsample(&synthetic::normalize_object_size(&points), args.stride)
        }
        None => synthetic::tetrahedron(),
    };
    println!("Object: #{} points", object.len());

    let config = match &args.config {
        Some(path) => serde_json::from_str::<ResolverConfig>(&std::fs::read_to_string(path)?)?,
        None => ResolverConfig::default(),
    };
    log::info!("resolver config: {:?}", config);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut sfm = TomasiKanade::new(config)?;

    for _ in 0..args.num_views {
        let camera = synthetic::OrthographicCamera::random(&mut rng);
        let image_points = camera.project(&object, args.noise_std, &mut rng)?;
        sfm.add_observation(&image_points)?;
    }
    println!("Simulated #{} views", sfm.num_views());

    let (reconstruction, errors) = sfm.run_evaluated(&mut rng, &object)?;
    println!(
        "Resolved the correction matrix in {} epochs, loss {:e}",
        reconstruction.num_epochs, reconstruction.loss
    );
    println!("Correction matrix: {:?}", reconstruction.correction);

    if let Some(first) = errors.first() {
        println!("Reconstruction error after the first epoch: {first:e}");
    }
    let error = reconstruction_error(&reconstruction.points(), &object)?;
    println!("Final reconstruction error: {error:e}");

    Ok(())
}
