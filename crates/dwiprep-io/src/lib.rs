pub mod nifti_io;
pub mod gradient_io;
pub mod transform_io;
pub mod acquisition;
pub mod qc_table;

pub use nifti_io::{
    read_image_space, read_nifti, read_nifti_series, read_reference_volume, read_volume_count, write_nifti,
    write_nifti_series,
};
pub use gradient_io::{read_bvals, read_bvecs, read_gradient_table, write_bvals, write_bvecs, write_gradient_table};
pub use transform_io::{read_matrix, read_transform, write_matrix, write_transform};
pub use acquisition::{
    eddy_index, read_metadata, slice_order, write_acqparams, write_indices, write_slspec,
    AcquisitionMetadata, Polarity,
};
pub use qc_table::{append_record, read_records, write_table};
