// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use weak_cube_rs as wcrs;

use log::info;
use std::{env, error::Error, path::PathBuf};

use wcrs::core::{box2d::Box2D, camera::Intrinsics, plane, priors::Priors, proposals, scoring};
use wcrs::misc::type_aliases::Float;
use wcrs::misc::{helper, interop};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if let Err(error) = run(&args) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}

const USAGE: &str = "Usage: ./wcrs_propose depth.png depth_scale priors.json \
                     fx fy cx cy x1 y1 x2 y2 category [ground_mask.png]";

/// Number of sampled proposals.
const NB_PROPOSALS: usize = 1000;

/// Number of printed proposals, best first.
const NB_PRINTED: usize = 20;

struct Args {
    depth_path: PathBuf,
    depth_scale: Float,
    priors_path: PathBuf,
    intrinsics: Intrinsics,
    reference: Box2D,
    category: String,
    ground_mask_path: Option<PathBuf>,
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let args = check_args(args)?;

    // Load inputs.
    let depth = helper::read_depth_png(&args.depth_path, args.depth_scale)?;
    let priors = Priors::load(&args.priors_path)?;
    let category = priors
        .category_id(&args.category)
        .ok_or_else(|| format!("Unknown category: {}", args.category))?;
    let prior = priors
        .dimensions(category)
        .ok_or_else(|| format!("No dimension prior for category {}", category))?;
    let ground_mask = match &args.ground_mask_path {
        Some(path) => Some(interop::mask_from_image(image::open(path)?.to_luma8(), 127)),
        None => None,
    };
    info!(
        "depth {}x{}, category {} ({})",
        depth.width(),
        depth.height(),
        args.category,
        category
    );

    // Ground normal.
    let mut rng = rand::thread_rng();
    let ground = plane::ground_normal(
        &depth,
        ground_mask.as_ref(),
        &args.intrinsics,
        &plane::PlaneFitConfig::default(),
        &mut rng,
    );
    info!("ground normal {:?} ({:?})", ground.normal, ground.validity);

    // Sample and rank proposals.
    let context = proposals::ProposalContext {
        depth: &depth,
        intrinsics: &args.intrinsics,
        ground_normal: Some(ground.normal),
    };
    let set = proposals::propose(
        &args.reference,
        prior,
        &context,
        NB_PROPOSALS,
        &proposals::SamplerConfig::default(),
        &mut rng,
    );
    let scoring_context = scoring::ScoringContext {
        intrinsics: &args.intrinsics,
        width: depth.width(),
        height: depth.height(),
        mask: None,
        prior,
        beta: scoring::DEFAULT_BETA,
    };
    let ranked = scoring::rank(&set, &scoring_context);

    println!("# rank score iou dims_score cx cy cz w h l");
    for (rank, proposal) in ranked.iter().take(NB_PRINTED).enumerate() {
        let cube = &set.cubes[proposal.index];
        let (c, d) = (cube.center(), cube.dimensions());
        println!(
            "{} {:.4} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3}",
            rank,
            proposal.scores.combined,
            proposal.scores.iou,
            proposal.scores.dimensions,
            c.x,
            c.y,
            c.z,
            d.x,
            d.y,
            d.z
        );
    }
    Ok(())
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, Box<dyn Error>> {
    let (required, ground_mask_path) = match args.len() {
        13 => (&args[1..13], None),
        14 => (&args[1..13], Some(PathBuf::from(&args[13]))),
        _ => {
            eprintln!("{}", USAGE);
            return Err("Wrong number of arguments".into());
        }
    };
    let depth_path = PathBuf::from(&required[0]);
    if !depth_path.is_file() {
        eprintln!("{}", USAGE);
        return Err(format!("The depth file does not exist: {}", required[0]).into());
    }
    let numbers = required[3..11]
        .iter()
        .map(|s| s.parse::<Float>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Args {
        depth_path,
        depth_scale: required[1].parse()?,
        priors_path: PathBuf::from(&required[2]),
        intrinsics: Intrinsics::new(numbers[0], numbers[1], numbers[2], numbers[3]),
        reference: Box2D::new(numbers[4], numbers[5], numbers[6], numbers[7])?,
        category: required[11].clone(),
        ground_mask_path,
    })
}
