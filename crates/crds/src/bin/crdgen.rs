//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use crds::{AddressClaim, GroupSegmentMapping, VirtualIP};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [VirtualIP::crd(), GroupSegmentMapping::crd(), AddressClaim::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
