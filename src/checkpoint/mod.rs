//! Persistence of fields, pose tables and training state.

pub use crate::{render::Graph, state::TrainingProgress};
pub use burn::{
    config::Config,
    module::Module,
    tensor::backend::Backend,
};

use crate::{error::Error, field::RadianceField};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::{fs, path::PathBuf};

/// The file name of [`CheckpointState`].
pub const STATE_FILE_NAME: &str = "state.json";

/// The training state stored along the modules.
#[derive(Config, Debug, PartialEq)]
pub struct CheckpointState {
    pub iteration: u64,
    /// The value of [`TrainingProgress`].
    pub progress: f64,
}

/// Saves and loads checkpoints under a directory.
///
/// ## Details
///
/// Every checkpoint lives in a directory named by its zero-padded iteration:
///
/// ```plaintext
/// 00000100/
/// ├── field.mpk
/// ├── field_fine.mpk
/// ├── poses.mpk
/// └── state.json
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpointer {
    pub directory: PathBuf,
}

impl Checkpointer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The directory of the checkpoint at `iteration`.
    pub fn path(
        &self,
        iteration: u64,
    ) -> PathBuf {
        self.directory.join(format!("{iteration:08}"))
    }

    /// Saves the fields and the pose table of `graph` with the training state.
    pub fn save<B: Backend, F: RadianceField<B> + Module<B>>(
        &self,
        graph: &Graph<B, F>,
        state: &CheckpointState,
    ) -> Result<PathBuf, Error> {
        let path = self.path(state.iteration);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        fs::create_dir_all(&path)?;

        graph
            .field
            .to_owned()
            .save_file(path.join("field"), &recorder)
            .map_err(|error| Error::Recorder(format!("{error:?}")))?;
        if let Some(field_fine) = &graph.field_fine {
            field_fine
                .to_owned()
                .save_file(path.join("field_fine"), &recorder)
                .map_err(|error| Error::Recorder(format!("{error:?}")))?;
        }
        if let Some(poses) = &graph.poses {
            poses
                .to_owned()
                .save_file(path.join("poses"), &recorder)
                .map_err(|error| Error::Recorder(format!("{error:?}")))?;
        }
        state.save(path.join(STATE_FILE_NAME))?;

        log::info!(
            target: "barf::checkpoint",
            "save > iteration {} at {path:?}",
            state.iteration,
        );

        Ok(path)
    }

    /// Loads the checkpoint at `iteration` into `graph`.
    ///
    /// ## Errors
    ///
    /// [`Error::MissingCheckpoint`] if there is no such checkpoint.
    pub fn load<B: Backend, F: RadianceField<B> + Module<B>>(
        &self,
        iteration: u64,
        mut graph: Graph<B, F>,
        device: &B::Device,
    ) -> Result<(Graph<B, F>, CheckpointState), Error> {
        let path = self.path(iteration);
        let path_state = path.join(STATE_FILE_NAME);
        if !path_state.is_file() {
            return Err(Error::MissingCheckpoint(path));
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let state = CheckpointState::load(&path_state)
            .map_err(|error| Error::Config(format!("{error:?}")))?;
        graph.field = graph
            .field
            .load_file(path.join("field"), &recorder, device)
            .map_err(|error| Error::Recorder(format!("{error:?}")))?;
        graph.field_fine = graph
            .field_fine
            .map(|field_fine| {
                field_fine
                    .load_file(path.join("field_fine"), &recorder, device)
                    .map_err(|error| Error::Recorder(format!("{error:?}")))
            })
            .transpose()?;
        graph.poses = graph
            .poses
            .map(|poses| {
                poses
                    .load_file(path.join("poses"), &recorder, device)
                    .map_err(|error| Error::Recorder(format!("{error:?}")))
            })
            .transpose()?;

        log::info!(
            target: "barf::checkpoint",
            "load > iteration {} from {path:?}",
            state.iteration,
        );

        Ok((graph, state))
    }

    /// The newest saved iteration, if any.
    pub fn latest(&self) -> Result<Option<u64>, Error> {
        Ok(self.iterations()?.last().copied())
    }

    /// All saved iterations in ascending order.
    pub fn iterations(&self) -> Result<Vec<u64>, Error> {
        if !self.directory.is_dir() {
            return Ok(vec![]);
        }

        let mut iterations = vec![];
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let iteration = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<u64>().ok());
            if let Some(iteration) = iteration {
                if path.join(STATE_FILE_NAME).is_file() {
                    iterations.push(iteration);
                }
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::NerfFieldConfig,
        pose::PoseRefinementConfig,
        render::VolumeRendererConfig,
        sampler::DepthSamplerConfig,
    };
    use burn::{backend::NdArray, tensor::Tensor};

    type B = NdArray<f32>;

    fn graph(device: &<B as Backend>::Device) -> Graph<B, crate::field::NerfField<B>> {
        let config = NerfFieldConfig::new()
            .with_feature_widths(vec![4, 4])
            .with_skip_layers(vec![])
            .with_rgb_widths(vec![2]);
        Graph {
            field: config.init(device),
            field_fine: Some(config.init(device)),
            poses: Some(PoseRefinementConfig::new(2).init(device)),
            sampler: DepthSamplerConfig::new(),
            renderer: VolumeRendererConfig::new(),
            is_ndc: false,
        }
    }

    fn directory(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("barf-checkpoint-{}-{name}", std::process::id()))
    }

    #[test]
    fn save_and_load() {
        let device = Default::default();
        let checkpointer = Checkpointer::new(directory("save_and_load"));
        let mut saved = graph(&device);
        if let Some(poses) = saved.poses.as_mut() {
            poses.set_tangents(Tensor::from_floats(
                [[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], [0.0; 6]],
                &device,
            ));
        }
        let state = CheckpointState::new(100, 0.5);

        checkpointer.save(&saved, &state).unwrap();
        checkpointer
            .save(&saved, &CheckpointState::new(20, 0.1))
            .unwrap();
        fs::create_dir_all(checkpointer.path(300)).unwrap();
        assert_eq!(checkpointer.iterations().unwrap(), vec![20, 100]);
        assert_eq!(checkpointer.latest().unwrap(), Some(100));

        let (loaded, loaded_state) =
            checkpointer.load(100, graph(&device), &device).unwrap();
        assert_eq!(loaded_state, state);
        loaded
            .poses
            .as_ref()
            .unwrap()
            .get_tangents()
            .into_data()
            .assert_approx_eq(
                &saved.poses.as_ref().unwrap().get_tangents().into_data(),
                6,
            );

        // Loading twice is idempotent
        let (again, _) =
            checkpointer.load(100, loaded.to_owned(), &device).unwrap();
        let weight = |graph: &Graph<B, crate::field::NerfField<B>>| {
            graph.field.layers_feature[0].weight.val().into_data()
        };
        weight(&again).assert_approx_eq(&weight(&loaded), 6);
        weight(&again).assert_approx_eq(&weight(&saved), 6);

        fs::remove_dir_all(checkpointer.directory).unwrap();
    }

    #[test]
    fn load_missing_checkpoint() {
        let device = Default::default();
        let checkpointer = Checkpointer::new(directory("load_missing"));

        let result = checkpointer.load(7, graph(&device), &device);
        assert!(matches!(result, Err(Error::MissingCheckpoint(_))));
        assert_eq!(checkpointer.latest().unwrap(), None);
        assert!(checkpointer.iterations().unwrap().is_empty());
    }
}
