//! Filter/weigher pipeline.
//!
//! Given the candidate cells for one attempt:
//! 1. Run every filter in registration order (a directive or `Handled`
//!    stops the pipeline immediately)
//! 2. Score the survivors with every weigher
//! 3. Transform each total by the cell's `weight_scale` and `weight_offset`
//! 4. Sort descending, ties keeping input order

use cellgrid_core::{CellState, WeightedCell};
use tracing::debug;

use crate::filter::{CellFilter, Directive, FilterError, FilterOutcome, FilterProperties};
use crate::weigher::CellWeigher;

/// Result of running the pipeline once.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Viable cells, best first.
    Ranked(Vec<WeightedCell>),
    /// A filter asked for the request to be forwarded.
    Directive(Directive),
    /// A filter dealt with the request; nothing more to do.
    Handled,
    /// Every candidate was filtered out.
    NoCandidates,
}

pub struct Pipeline {
    filters: Vec<Box<dyn CellFilter>>,
    weighers: Vec<Box<dyn CellWeigher>>,
}

impl Pipeline {
    pub fn new(filters: Vec<Box<dyn CellFilter>>, weighers: Vec<Box<dyn CellWeigher>>) -> Self {
        Self { filters, weighers }
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn weigher_names(&self) -> Vec<&'static str> {
        self.weighers.iter().map(|w| w.name()).collect()
    }

    pub fn run(
        &self,
        cells: Vec<CellState>,
        props: &mut FilterProperties,
    ) -> Result<PipelineOutcome, FilterError> {
        let mut cells = cells;
        for filter in &self.filters {
            match filter.filter_all(cells, props)? {
                FilterOutcome::Cells(survivors) => {
                    debug!(filter = filter.name(), remaining = survivors.len(), "filter applied");
                    cells = survivors;
                }
                FilterOutcome::Directive(directive) => {
                    debug!(filter = filter.name(), route = %directive.target, "filter issued directive");
                    return Ok(PipelineOutcome::Directive(directive));
                }
                FilterOutcome::Handled => {
                    debug!(filter = filter.name(), "filter handled request");
                    return Ok(PipelineOutcome::Handled);
                }
            }
        }

        if cells.is_empty() {
            return Ok(PipelineOutcome::NoCandidates);
        }
        Ok(PipelineOutcome::Ranked(self.weigh(cells, props)))
    }

    /// Score and sort cells without filtering.
    pub fn weigh(&self, cells: Vec<CellState>, props: &FilterProperties) -> Vec<WeightedCell> {
        let mut weighted: Vec<WeightedCell> = cells
            .into_iter()
            .map(|cell| {
                let raw: f64 = self
                    .weighers
                    .iter()
                    .map(|w| w.weigh(&cell, props) * w.multiplier())
                    .sum();
                let score = raw * cell.weight_scale + cell.weight_offset;
                WeightedCell { cell, score }
            })
            .collect();
        // sort_by is stable, so equal scores keep input order.
        weighted.sort_by(|a, b| b.score.total_cmp(&a.score));
        weighted
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("filters", &self.filter_names())
            .field("weighers", &self.weigher_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AvailabilityZoneFilter, PickCellFilter};
    use cellgrid_core::{
        InstanceType, RequestContext, RequestSpec, RoutingPath, RunInstanceRequest,
    };
    use serde_json::{Value, json};

    /// Scores cells by a fixed per-name table.
    struct TableWeigher(Vec<(&'static str, f64)>);

    impl CellWeigher for TableWeigher {
        fn name(&self) -> &'static str {
            "table"
        }

        fn weigh(&self, cell: &CellState, _props: &FilterProperties) -> f64 {
            self.0
                .iter()
                .find(|(name, _)| *name == cell.name)
                .map(|(_, score)| *score)
                .unwrap_or(0.0)
        }
    }

    struct HandledFilter;

    impl CellFilter for HandledFilter {
        fn name(&self) -> &'static str {
            "handled"
        }

        fn filter_all(
            &self,
            _cells: Vec<CellState>,
            _props: &mut FilterProperties,
        ) -> Result<FilterOutcome, FilterError> {
            Ok(FilterOutcome::Handled)
        }
    }

    struct RejectAll;

    impl CellFilter for RejectAll {
        fn name(&self) -> &'static str {
            "reject_all"
        }

        fn cell_passes(&self, _cell: &CellState, _props: &FilterProperties) -> bool {
            false
        }
    }

    fn props(hints: Value) -> FilterProperties {
        let spec = RequestSpec {
            instance_properties: Default::default(),
            instance_uuids: vec!["uuid-1".to_string()],
            instance_type: InstanceType::default(),
            image: Value::Null,
            security_groups: Vec::new(),
            block_device_mapping: Vec::new(),
        };
        let mut request = RunInstanceRequest::new(spec);
        if let Value::Object(map) = hints {
            request.filter_properties.scheduler_hints = map;
        }
        FilterProperties::new(
            &RequestContext::new("user", "project"),
            &RoutingPath::root("api"),
            &request,
        )
    }

    fn cells(names: &[&str]) -> Vec<CellState> {
        names.iter().map(|n| CellState::new(*n)).collect()
    }

    fn ranked_names(outcome: PipelineOutcome) -> Vec<String> {
        match outcome {
            PipelineOutcome::Ranked(ranked) => ranked.into_iter().map(|w| w.cell.name).collect(),
            other => panic!("expected ranking, got {other:?}"),
        }
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let pipeline = Pipeline::new(
            Vec::new(),
            vec![Box::new(TableWeigher(vec![("A", 5.0), ("B", 5.0), ("C", 3.0)]))],
        );
        let outcome = pipeline.run(cells(&["A", "B", "C"]), &mut props(json!({}))).unwrap();
        assert_eq!(ranked_names(outcome), vec!["A", "B", "C"]);

        let outcome = pipeline.run(cells(&["C", "B", "A"]), &mut props(json!({}))).unwrap();
        assert_eq!(ranked_names(outcome), vec!["B", "A", "C"]);
    }

    #[test]
    fn scale_and_offset_transform_totals() {
        let pipeline = Pipeline::new(
            Vec::new(),
            vec![Box::new(TableWeigher(vec![("A", 2.0), ("B", 3.0)]))],
        );
        let mut input = cells(&["A", "B"]);
        input[0].weight_scale = 2.0;
        input[0].weight_offset = 10.0;
        input[1].weight_scale = -1.0;

        let ranked = pipeline.weigh(input, &props(json!({})));
        assert_eq!(ranked[0].cell.name, "A");
        assert_eq!(ranked[0].score, 14.0);
        assert_eq!(ranked[1].score, -3.0);
    }

    #[test]
    fn directive_short_circuits_later_filters() {
        let pipeline = Pipeline::new(
            vec![Box::new(PickCellFilter), Box::new(HandledFilter)],
            Vec::new(),
        );
        let mut p = props(json!({"cell": "api-c9"}));
        let outcome = pipeline.run(cells(&["c1"]), &mut p).unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Directive(Directive::direct_route(
                RoutingPath::parse("api!c9").unwrap()
            ))
        );
    }

    #[test]
    fn directive_issued_even_after_everything_filtered() {
        let pipeline = Pipeline::new(vec![Box::new(RejectAll), Box::new(PickCellFilter)], Vec::new());
        let outcome = pipeline
            .run(cells(&["c1"]), &mut props(json!({"cell": "api!c1"})))
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Directive(_)));
    }

    #[test]
    fn handled_is_distinct_from_empty() {
        let handled = Pipeline::new(vec![Box::new(HandledFilter)], Vec::new());
        assert_eq!(
            handled.run(cells(&["c1"]), &mut props(json!({}))).unwrap(),
            PipelineOutcome::Handled
        );

        let empty = Pipeline::new(vec![Box::new(RejectAll)], Vec::new());
        assert_eq!(
            empty.run(cells(&["c1"]), &mut props(json!({}))).unwrap(),
            PipelineOutcome::NoCandidates
        );
    }

    #[test]
    fn az_filter_then_rank() {
        let pipeline = Pipeline::new(
            vec![Box::new(AvailabilityZoneFilter)],
            vec![Box::new(TableWeigher(vec![("c1", 1.0), ("c3", 9.0)]))],
        );
        let mut input = cells(&["c1", "c2", "c3"]);
        input[0].capabilities.insert("availability_zones".into(), json!(["z1"]));
        input[2].capabilities.insert("availability_zones".into(), json!(["z1", "z2"]));

        let mut p = props(json!({}));
        p.request_spec.instance_properties.availability_zone = Some("z1".to_string());
        let outcome = pipeline.run(input, &mut p).unwrap();
        assert_eq!(ranked_names(outcome), vec!["c3", "c1"]);
    }
}
