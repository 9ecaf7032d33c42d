//! Workflow-graph construction.
//!
//! ComfyUI executes a JSON-described DAG of typed nodes. This module
//! builds those graphs programmatically: [`WorkflowGraph`] owns the
//! node map and mints node identifiers internally, and
//! [`GraphSpec::build`] assembles the full render graph for one
//! generation job in a single pass.
//!
//! Node `class_type` strings are part of the ComfyUI API surface and
//! live in the constants block below. Model filenames and sampler
//! names vary per installation and are carried by [`ModelSet`].

use std::collections::BTreeMap;

use serde::Serialize;

// ---------------------------------------------------------------------------
// ComfyUI node class types
// ---------------------------------------------------------------------------

pub const CLASS_UNET_LOADER: &str = "UnetLoaderGGUF";
pub const CLASS_DUAL_CLIP_LOADER: &str = "DualCLIPLoader";
pub const CLASS_VAE_LOADER: &str = "VAELoader";
pub const CLASS_CLIP_TEXT_ENCODE: &str = "CLIPTextEncode";
pub const CLASS_EMPTY_LATENT: &str = "EmptySD3LatentImage";
pub const CLASS_LOAD_IMAGE: &str = "LoadImage";
pub const CLASS_IMAGE_SCALE: &str = "ImageScale";
pub const CLASS_VAE_ENCODE: &str = "VAEEncode";
pub const CLASS_IMAGE_TO_MASK: &str = "ImageToMask";
pub const CLASS_SET_LATENT_NOISE_MASK: &str = "SetLatentNoiseMask";
pub const CLASS_CONTROL_NET_LOADER: &str = "ControlNetLoader";
pub const CLASS_CONTROL_NET_APPLY: &str = "ControlNetApplyAdvanced";
pub const CLASS_KSAMPLER: &str = "KSampler";
pub const CLASS_VAE_DECODE: &str = "VAEDecode";
pub const CLASS_SAVE_IMAGE: &str = "SaveImage";

/// Seeds are truncated to the range ComfyUI samplers accept.
const SEED_MODULUS: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// Graph primitives
// ---------------------------------------------------------------------------

/// Identifier of one node within a graph.
///
/// Minted only by [`WorkflowGraph::add_node`]; callers never fabricate
/// these, which rules out identifier collisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(String);

impl NodeId {
    /// Reference to this node's output at `index`.
    pub fn output(&self, index: u32) -> NodeRef {
        NodeRef(self.clone(), index)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to another node's output slot.
///
/// Serializes to the ComfyUI wire shape `["<node_id>", <output_index>]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRef(pub NodeId, pub u32);

/// Value bound to a named input slot: either a literal or a reference
/// to another node's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Ref(NodeRef),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<NodeRef> for InputValue {
    fn from(value: NodeRef) -> Self {
        Self::Ref(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for InputValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for InputValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One step in the execution graph.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub class_type: String,
    pub inputs: BTreeMap<String, InputValue>,
}

/// A complete node graph, keyed by node identifier.
///
/// Serializes to the ComfyUI `/prompt` body shape
/// `{ "<id>": { "class_type": ..., "inputs": {...} } }`. Built
/// incrementally via [`add_node`](Self::add_node) and treated as
/// immutable once handed to the submission client.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u32,
}

impl Serialize for WorkflowGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.nodes.serialize(serializer)
    }
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its freshly minted identifier.
    pub fn add_node<I>(&mut self, class_type: &str, inputs: I) -> NodeId
    where
        I: IntoIterator<Item = (&'static str, InputValue)>,
    {
        self.next_id += 1;
        let id = NodeId(self.next_id.to_string());
        let node = Node {
            class_type: class_type.to_string(),
            inputs: inputs
                .into_iter()
                .map(|(slot, value)| (slot.to_string(), value))
                .collect(),
        };
        self.nodes.insert(id.clone(), node);
        id
    }

    /// All nodes in the graph, keyed by identifier.
    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    /// Check the invariants the remote service requires: every input
    /// reference resolves, exactly one `SaveImage` terminal exists, and
    /// the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (id, node) in &self.nodes {
            for (slot, value) in &node.inputs {
                if let InputValue::Ref(NodeRef(target, _)) = value {
                    if !self.nodes.contains_key(target) {
                        return Err(GraphError::UnknownReference {
                            node: id.clone(),
                            slot: slot.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        let save_count = self
            .nodes
            .values()
            .filter(|node| node.class_type == CLASS_SAVE_IMAGE)
            .count();
        if save_count != 1 {
            return Err(GraphError::SaveNodeCount(save_count));
        }

        self.check_acyclic()
    }

    /// Depth-first search over input references, rejecting back edges.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&NodeId, Mark> = BTreeMap::new();

        fn visit<'a>(
            graph: &'a WorkflowGraph,
            id: &'a NodeId,
            marks: &mut BTreeMap<&'a NodeId, Mark>,
        ) -> Result<(), GraphError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(GraphError::Cycle(id.clone())),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(node) = graph.nodes.get(id) {
                for value in node.inputs.values() {
                    if let InputValue::Ref(NodeRef(target, _)) = value {
                        visit(graph, target, marks)?;
                    }
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.nodes.keys() {
            visit(self, id, &mut marks)?;
        }
        Ok(())
    }
}

/// Errors from graph construction and validation.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Input '{slot}' of node {node} references unknown node {target}")]
    UnknownReference {
        node: NodeId,
        slot: String,
        target: NodeId,
    },

    #[error("Graph must contain exactly one SaveImage node, found {0}")]
    SaveNodeCount(usize),

    #[error("Cycle detected at node {0}")]
    Cycle(NodeId),

    #[error("A mask was supplied without a reference image to inpaint")]
    MaskWithoutReference,

    #[error("Prompt text must not be empty")]
    EmptyPrompt,
}

// ---------------------------------------------------------------------------
// Render graph builder
// ---------------------------------------------------------------------------

/// Model filenames and sampler settings for one ComfyUI installation.
///
/// Defaults match the Flux GGUF set the pipeline ships with.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub unet: String,
    pub clip_l: String,
    pub clip_t5: String,
    pub vae: String,
    pub control_net: String,
    pub sampler: String,
    pub scheduler: String,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            unet: "flux1-dev-Q4_K_S.gguf".into(),
            clip_l: "clip_l.safetensors".into(),
            clip_t5: "t5xxl_fp8_e4m3fn.safetensors".into(),
            vae: "ae.safetensors".into(),
            control_net: "flux-controlnet-union.safetensors".into(),
            sampler: "euler".into(),
            scheduler: "simple".into(),
        }
    }
}

/// One ControlNet conditioning input: an already-staged map image plus
/// application strength and the sampling range it applies over.
#[derive(Debug, Clone)]
pub struct ControlMap {
    /// Filename of the map inside the server's input directory.
    pub image: String,
    pub strength: f64,
    pub start_percent: f64,
    pub end_percent: f64,
}

impl ControlMap {
    /// Depth-map conditioning at the strength tuned for exteriors.
    pub fn depth(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            strength: 0.65,
            start_percent: 0.0,
            end_percent: 0.85,
        }
    }

    /// Canny edge-map conditioning, applied more lightly than depth.
    pub fn canny(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            strength: 0.50,
            start_percent: 0.0,
            end_percent: 0.70,
        }
    }
}

/// Parameters for one render graph.
///
/// Image filenames refer to files the caller has already staged into
/// the server's input directory; building a graph touches neither
/// filesystem nor network.
#[derive(Debug, Clone)]
pub struct GraphSpec {
    /// Positive text prompt.
    pub prompt: String,
    /// Reference photo to encode as the starting latent (img2img /
    /// inpainting). `None` starts from an empty latent.
    pub reference_image: Option<String>,
    /// Inpainting mask; only the masked region is regenerated. Requires
    /// `reference_image`.
    pub mask_image: Option<String>,
    /// ControlNet conditioning maps, applied in order.
    pub control_maps: Vec<ControlMap>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    /// Guidance (cfg) scale.
    pub guidance: f64,
    /// Denoise strength; inside a mask this bounds how far the sampler
    /// may depart from the reference.
    pub denoise: f64,
    /// Sampler seed. `None` picks a time-derived seed.
    pub seed: Option<u64>,
    /// Prefix for the server-side output filename.
    pub filename_prefix: String,
}

impl GraphSpec {
    /// New spec with empty-latent defaults; callers set the optional
    /// conditioning fields they need.
    pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            prompt: prompt.into(),
            reference_image: None,
            mask_image: None,
            control_maps: Vec::new(),
            width,
            height,
            steps: 20,
            guidance: 1.0,
            denoise: 1.0,
            seed: None,
            filename_prefix: "homeforge".into(),
        }
    }
}

/// A fully built graph together with the seed that was baked into it.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: WorkflowGraph,
    /// The seed baked into the KSampler node; derived from the clock
    /// when the request left it unset.
    pub seed: u64,
}

impl GraphSpec {
    /// Assemble the complete render graph in one pass.
    ///
    /// Node order: model loaders, text encode, optional reference image
    /// encode, optional mask chain, optional ControlNet chain, sampler,
    /// decode, save. The result is validated before it is returned.
    pub fn build(&self, models: &ModelSet) -> Result<BuiltGraph, GraphError> {
        if self.prompt.trim().is_empty() {
            return Err(GraphError::EmptyPrompt);
        }
        if self.mask_image.is_some() && self.reference_image.is_none() {
            return Err(GraphError::MaskWithoutReference);
        }

        // Explicit seeds are reduced the same way as derived ones; the
        // wire format carries signed integers, so an unreduced value
        // above i64::MAX would arrive negative.
        let seed = self
            .seed
            .map(|seed| seed % SEED_MODULUS)
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64 % SEED_MODULUS);

        let mut graph = WorkflowGraph::new();

        let unet = graph.add_node(CLASS_UNET_LOADER, [("unet_name", models.unet.clone().into())]);
        let clip = graph.add_node(
            CLASS_DUAL_CLIP_LOADER,
            [
                ("clip_name1", models.clip_l.clone().into()),
                ("clip_name2", models.clip_t5.clone().into()),
                ("type", "flux".into()),
            ],
        );
        let vae = graph.add_node(CLASS_VAE_LOADER, [("vae_name", models.vae.clone().into())]);

        let encode = graph.add_node(
            CLASS_CLIP_TEXT_ENCODE,
            [
                ("text", self.prompt.clone().into()),
                ("clip", clip.output(0).into()),
            ],
        );

        // Starting latent: encoded reference photo, optionally masked,
        // or an empty placeholder.
        let latent = match &self.reference_image {
            Some(reference) => {
                let pixels = self.load_scaled_image(&mut graph, reference);
                let encoded = graph.add_node(
                    CLASS_VAE_ENCODE,
                    [
                        ("pixels", pixels.output(0).into()),
                        ("vae", vae.output(0).into()),
                    ],
                );
                match &self.mask_image {
                    Some(mask) => {
                        let mask_pixels = self.load_scaled_image(&mut graph, mask);
                        let mask_node = graph.add_node(
                            CLASS_IMAGE_TO_MASK,
                            [
                                ("image", mask_pixels.output(0).into()),
                                ("channel", "red".into()),
                            ],
                        );
                        graph.add_node(
                            CLASS_SET_LATENT_NOISE_MASK,
                            [
                                ("samples", encoded.output(0).into()),
                                ("mask", mask_node.output(0).into()),
                            ],
                        )
                    }
                    None => encoded,
                }
            }
            None => graph.add_node(
                CLASS_EMPTY_LATENT,
                [
                    ("width", self.width.into()),
                    ("height", self.height.into()),
                    ("batch_size", 1u32.into()),
                ],
            ),
        };

        let mut conditioning = encode.output(0);
        for map in &self.control_maps {
            let map_image = graph.add_node(CLASS_LOAD_IMAGE, [("image", map.image.clone().into())]);
            let loader = graph.add_node(
                CLASS_CONTROL_NET_LOADER,
                [("control_net_name", models.control_net.clone().into())],
            );
            let applied = graph.add_node(
                CLASS_CONTROL_NET_APPLY,
                [
                    ("positive", conditioning.clone().into()),
                    ("negative", encode.output(0).into()),
                    ("control_net", loader.output(0).into()),
                    ("vae", vae.output(0).into()),
                    ("image", map_image.output(0).into()),
                    ("strength", map.strength.into()),
                    ("start_percent", map.start_percent.into()),
                    ("end_percent", map.end_percent.into()),
                ],
            );
            conditioning = applied.output(0);
        }

        // Flux ignores negative conditioning; the same encode feeds both.
        let sampler = graph.add_node(
            CLASS_KSAMPLER,
            [
                ("model", unet.output(0).into()),
                ("positive", conditioning.clone().into()),
                ("negative", conditioning.into()),
                ("latent_image", latent.output(0).into()),
                ("seed", seed.into()),
                ("steps", self.steps.into()),
                ("cfg", self.guidance.into()),
                ("sampler_name", models.sampler.clone().into()),
                ("scheduler", models.scheduler.clone().into()),
                ("denoise", self.denoise.into()),
            ],
        );

        let decoded = graph.add_node(
            CLASS_VAE_DECODE,
            [
                ("samples", sampler.output(0).into()),
                ("vae", vae.output(0).into()),
            ],
        );

        graph.add_node(
            CLASS_SAVE_IMAGE,
            [
                ("images", decoded.output(0).into()),
                ("filename_prefix", self.filename_prefix.clone().into()),
            ],
        );

        graph.validate()?;
        Ok(BuiltGraph { graph, seed })
    }

    /// `LoadImage` followed by a lanczos center-crop scale to the
    /// target resolution.
    fn load_scaled_image(&self, graph: &mut WorkflowGraph, filename: &str) -> NodeId {
        let loaded = graph.add_node(CLASS_LOAD_IMAGE, [("image", filename.into())]);
        graph.add_node(
            CLASS_IMAGE_SCALE,
            [
                ("image", loaded.output(0).into()),
                ("upscale_method", "lanczos".into()),
                ("width", self.width.into()),
                ("height", self.height.into()),
                ("crop", "center".into()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inpaint_spec() -> GraphSpec {
        let mut spec = GraphSpec::new("restored alpine stone house", 512, 384);
        spec.reference_image = Some("site_photo.jpg".into());
        spec.mask_image = Some("mask_rudere.png".into());
        spec.steps = 12;
        spec.guidance = 3.5;
        spec.denoise = 0.78;
        spec.seed = Some(42);
        spec.filename_prefix = "inpaint_v1".into();
        spec
    }

    fn classes(graph: &WorkflowGraph) -> Vec<&str> {
        graph.nodes().values().map(|n| n.class_type.as_str()).collect()
    }

    #[test]
    fn inpaint_graph_is_well_formed() {
        let built = inpaint_spec().build(&ModelSet::default()).unwrap();
        assert!(built.graph.validate().is_ok());
        assert_eq!(built.seed, 42);

        let classes = classes(&built.graph);
        assert!(classes.contains(&CLASS_VAE_ENCODE));
        assert!(classes.contains(&CLASS_IMAGE_TO_MASK));
        assert!(classes.contains(&CLASS_SET_LATENT_NOISE_MASK));
        assert!(!classes.contains(&CLASS_EMPTY_LATENT));
    }

    #[test]
    fn no_reference_starts_from_empty_latent() {
        let built = GraphSpec::new("stone house", 1024, 768)
            .build(&ModelSet::default())
            .unwrap();
        let classes = classes(&built.graph);
        assert!(classes.contains(&CLASS_EMPTY_LATENT));
        assert!(!classes.contains(&CLASS_VAE_ENCODE));
        assert!(!classes.contains(&CLASS_SET_LATENT_NOISE_MASK));
    }

    #[test]
    fn mask_without_reference_is_rejected() {
        let mut spec = GraphSpec::new("stone house", 512, 384);
        spec.mask_image = Some("mask.png".into());
        assert!(matches!(
            spec.build(&ModelSet::default()),
            Err(GraphError::MaskWithoutReference)
        ));
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let spec = GraphSpec::new("   ", 512, 384);
        assert!(matches!(
            spec.build(&ModelSet::default()),
            Err(GraphError::EmptyPrompt)
        ));
    }

    #[test]
    fn exactly_one_save_node() {
        let built = inpaint_spec().build(&ModelSet::default()).unwrap();
        let saves = built
            .graph
            .nodes()
            .values()
            .filter(|n| n.class_type == CLASS_SAVE_IMAGE)
            .count();
        assert_eq!(saves, 1);
    }

    #[test]
    fn control_maps_chain_conditioning() {
        let mut spec = GraphSpec::new("stone house", 1024, 768);
        spec.control_maps = vec![
            ControlMap::depth("depth.png"),
            ControlMap::canny("canny.png"),
        ];
        let built = spec.build(&ModelSet::default()).unwrap();

        let applies = built
            .graph
            .nodes()
            .values()
            .filter(|n| n.class_type == CLASS_CONTROL_NET_APPLY)
            .count();
        assert_eq!(applies, 2);

        // The sampler's positive conditioning must come from the apply
        // node of the last control map, not directly from the text
        // encode.
        let sampler = built
            .graph
            .nodes()
            .values()
            .find(|n| n.class_type == CLASS_KSAMPLER)
            .unwrap();
        let InputValue::Ref(NodeRef(pos_id, _)) = &sampler.inputs["positive"] else {
            panic!("positive conditioning must be a node reference");
        };
        let apply = &built.graph.nodes()[pos_id];
        assert_eq!(apply.class_type, CLASS_CONTROL_NET_APPLY);

        let InputValue::Ref(NodeRef(image_id, _)) = &apply.inputs["image"] else {
            panic!("control image must be a node reference");
        };
        let load = &built.graph.nodes()[image_id];
        assert_eq!(load.inputs["image"], InputValue::Text("canny.png".into()));
    }

    #[test]
    fn building_twice_with_same_seed_is_identical() {
        let spec = inpaint_spec();
        let a = spec.build(&ModelSet::default()).unwrap();
        let b = spec.build(&ModelSet::default()).unwrap();
        assert_eq!(
            serde_json::to_value(&a.graph).unwrap(),
            serde_json::to_value(&b.graph).unwrap()
        );
    }

    #[test]
    fn explicit_seed_is_reduced_to_sampler_range() {
        let mut spec = GraphSpec::new("stone house", 512, 384);
        spec.seed = Some(u64::MAX);
        let built = spec.build(&ModelSet::default()).unwrap();
        assert_eq!(built.seed, u64::MAX % SEED_MODULUS);

        // The serialized sampler seed must stay non-negative.
        let value = serde_json::to_value(&built.graph).unwrap();
        let sampler = value
            .as_object()
            .unwrap()
            .values()
            .find(|n| n["class_type"] == CLASS_KSAMPLER)
            .unwrap();
        assert_eq!(
            sampler["inputs"]["seed"],
            serde_json::json!(4_294_967_295u64)
        );
    }

    #[test]
    fn default_seed_is_time_derived_and_in_range() {
        let spec = GraphSpec::new("stone house", 512, 384);
        let built = spec.build(&ModelSet::default()).unwrap();
        assert!(built.seed < SEED_MODULUS);
    }

    #[test]
    fn references_serialize_as_id_index_pairs() {
        let built = inpaint_spec().build(&ModelSet::default()).unwrap();
        let value = serde_json::to_value(&built.graph).unwrap();

        // KSampler "model" input must be ["<unet_id>", 0].
        let sampler = value
            .as_object()
            .unwrap()
            .values()
            .find(|n| n["class_type"] == CLASS_KSAMPLER)
            .unwrap();
        let model = &sampler["inputs"]["model"];
        assert!(model.is_array());
        assert_eq!(model[1], 0);
        assert!(model[0].is_string());
    }

    #[test]
    fn unknown_reference_fails_validation() {
        let mut graph = WorkflowGraph::new();
        let ghost = NodeId("99".to_string());
        graph.add_node(CLASS_SAVE_IMAGE, [("images", ghost.output(0).into())]);
        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownReference { .. })
        ));
    }

    #[test]
    fn self_cycle_fails_validation() {
        let mut graph = WorkflowGraph::new();
        let save = graph.add_node(CLASS_SAVE_IMAGE, [("filename_prefix", "x".into())]);
        let self_ref = save.output(0).into();
        graph
            .nodes
            .get_mut(&save)
            .unwrap()
            .inputs
            .insert("images".into(), self_ref);
        assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
    }
}
