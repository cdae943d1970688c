mod element_definition;
mod structure_definition;

pub use element_definition::{
    parse_max, Binding, BindingStrength, Constraint, ConstraintSeverity, Discriminator,
    DiscriminatorType, ElementDefinition, Slicing, SlicingRules, TypeRef, UNBOUNDED,
};
pub use structure_definition::{ElementIndex, StructureDefinition, StructureDefinitionKind};
