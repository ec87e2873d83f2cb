//! Volume, direction and strength order through merging.

mod common;

use burn_ndarray::NdArray;
use common::constant;
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::image::ImageSeries;
use dwiprep_core::spatial::Vector3;
use dwiprep_registration::merge::merge_runs;
use dwiprep_registration::DiffusionDataset;
use proptest::prelude::*;

type B = NdArray<f32>;

/// Run `r` volume `k` carries marker `r * 100 + k` in image, strength and direction.
fn tagged_run(run: usize, volumes: usize) -> DiffusionDataset<B> {
    let device = Default::default();
    let markers: Vec<f64> = (0..volumes).map(|k| (run * 100 + k) as f64).collect();
    let series = ImageSeries::new(markers.iter().map(|&m| constant::<B>([2, 2, 2], m as f32, &device)).collect()).unwrap();
    let table = GradientTable::new(
        markers.clone(),
        markers.iter().map(|&m| Vector3::new(1.0, m, 0.0).normalize()).collect(),
    )
    .unwrap();
    DiffusionDataset::new(series, table).unwrap()
}

#[test]
fn three_and_two_volumes_merge_in_order() {
    let merged = merge_runs(vec![tagged_run(0, 3), tagged_run(1, 2)]).unwrap();
    assert_eq!(merged.len(), 5);
    assert_eq!(merged.table().bvals(), &[0.0, 1.0, 2.0, 100.0, 101.0]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn markers_stay_at_the_same_index(sizes in proptest::collection::vec(1usize..5, 1..5)) {
        let runs = sizes.iter().enumerate().map(|(r, &n)| tagged_run(r, n)).collect();
        let merged = merge_runs(runs).unwrap();
        prop_assert_eq!(merged.len(), sizes.iter().sum::<usize>());

        let expected: Vec<f64> = sizes
            .iter()
            .enumerate()
            .flat_map(|(r, &n)| (0..n).map(move |k| (r * 100 + k) as f64))
            .collect();
        for (i, &marker) in expected.iter().enumerate() {
            prop_assert_eq!(merged.series().volume(i).unwrap().values()[0] as f64, marker);
            prop_assert_eq!(merged.table().bvals()[i], marker);
            let direction = Vector3::new(1.0, marker, 0.0).normalize();
            prop_assert!((merged.table().bvecs()[i] - direction).norm() < 1e-12);
        }
    }
}
