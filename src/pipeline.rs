//! End-to-end tracking run: graph, costs, export, solve, interpretation.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};

use crate::config::TrackingConfig;
use crate::error::{Error, Result};
use crate::graph::{FieldOfView, GraphBuilder, HypothesesGraph, LabelImageSource, TraxelSource, TraxelStore};
use crate::model::{CostModel, CostModelGenerator, ModelDocument, ModelExporter, TransitionClassifier};
use crate::output::{CtcWriter, remap_frames, remap_labels};
use crate::solution::{Lineage, Solution, SolutionInterpreter, Solver, TrackMapping};

/// Graph, costs and solver document of one run, before solving.
#[derive(Debug, Clone)]
pub struct BuiltModel {
    pub graph: HypothesesGraph,
    pub costs: CostModel,
    pub document: ModelDocument,
}

/// Everything a solved run produces.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub graph: HypothesesGraph,
    pub solution: Solution,
    pub lineage: Lineage,
    pub mapping: TrackMapping,
}

/// Bundles a configuration, a solver backend and an optional transition
/// classifier into a complete tracking run.
pub struct TrackingPipeline<S: Solver> {
    config: TrackingConfig,
    solver: S,
    fov: Option<FieldOfView>,
    classifier: Option<Box<dyn TransitionClassifier>>,
}

impl<S: Solver> TrackingPipeline<S> {
    /// Validates the configuration before any work is done.
    pub fn new(solver: S, config: TrackingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            solver,
            fov: None,
            classifier: None,
        })
    }

    pub fn with_default_config(solver: S) -> Self {
        Self {
            config: TrackingConfig::default(),
            solver,
            fov: None,
            classifier: None,
        }
    }

    /// Field of view used for border distances. Required when a border
    /// margin is configured; otherwise the box enclosing all traxels is used.
    pub fn with_field_of_view(mut self, fov: FieldOfView) -> Self {
        self.fov = Some(fov);
        self
    }

    /// Use a trained classifier for transition costs.
    pub fn with_classifier(mut self, classifier: impl TransitionClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    /// Pull all frames of `source` through the configured filter.
    pub fn load_traxels<T: TraxelSource>(&self, source: &mut T) -> Result<TraxelStore> {
        TraxelStore::from_source(source, &self.config.filter)
    }

    /// Build the hypotheses graph, its costs and the solver document.
    pub fn build_model(&self, store: &TraxelStore) -> Result<BuiltModel> {
        let mut graph = GraphBuilder::new(&self.config.graph)?.build(store)?;
        if self.config.graph.with_tracklets {
            graph = graph.tracklet_graph();
        }
        graph.check_invariants(store)?;

        let fov = match (self.fov, self.config.costs.border_margin) {
            (Some(fov), _) => fov,
            (None, Some(_)) => {
                return Err(Error::config(
                    "a border margin needs an explicit field of view",
                ));
            }
            (None, None) => FieldOfView::enclosing(store)?
                .unwrap_or(FieldOfView::new([0.0; 4], [0.0; 4])),
        };
        let mut generator = CostModelGenerator::new(&self.config.costs, store, fov)?;
        if let Some(classifier) = self.classifier.as_deref() {
            generator = generator.with_classifier(classifier);
        }
        let costs = generator.generate(&graph)?;
        let document = ModelExporter::new(&self.config.export)?.export(&graph, store, &costs)?;
        Ok(BuiltModel {
            graph,
            costs,
            document,
        })
    }

    /// Build, solve once, and interpret the solution.
    pub fn run(&mut self, store: &TraxelStore) -> Result<TrackingResult> {
        let BuiltModel {
            graph, document, ..
        } = self.build_model(store)?;

        tracing::info!("solving with backend `{}`", self.solver.name());
        let result = self
            .solver
            .solve(&document, &self.config.weights)
            .map_err(Into::<Error>::into)?;

        let solution = Solution::from_result(&graph, &result)?;
        let mut interpreter = SolutionInterpreter::new(&graph, store, &solution);
        interpreter.assign_track_ids()?;
        let lineage = interpreter.lineage()?;
        let mapping = interpreter.mapping()?;
        tracing::info!("tracking finished with {} tracks", lineage.len());

        Ok(TrackingResult {
            graph,
            solution,
            lineage,
            mapping,
        })
    }

    /// Remap every frame of the observed range and write the lineage table
    /// and label images into `dir`.
    pub fn write_results<L: LabelImageSource>(
        &self,
        store: &TraxelStore,
        result: &TrackingResult,
        labels: &mut L,
        dir: impl AsRef<Path>,
    ) -> Result<()> {
        let writer = CtcWriter::new(dir.as_ref(), &self.config.output)?;
        writer.write_tracks(&result.lineage)?;
        let Some(range) = store.time_range() else {
            return Ok(());
        };
        let empty = store.empty_frames();
        let mut frames = remap_frames(
            labels,
            &result.mapping,
            range.iter().filter(|t| !empty.contains(t)),
        )?;

        // Empty frames may have no label image; write them blank.
        let shape = frames.values().next().map(|f| f.shape().to_vec());
        for &t in empty {
            let frame = match labels.label_image(t) {
                Ok(image) => remap_labels(&image, &result.mapping.frame(t))?,
                Err(e) => match &shape {
                    Some(shape) => {
                        tracing::debug!("no label image for empty timestep {}: {}", t, e);
                        ArrayD::zeros(IxDyn(shape))
                    }
                    None => {
                        tracing::warn!("skipping empty timestep {} without a label image", t);
                        continue;
                    }
                },
            };
            frames.insert(t, frame);
        }
        writer.write_frames(&frames)?;
        Ok(())
    }
}
