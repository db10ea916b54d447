//! Taxon registry and species map for one run.
//!
//! # Overview
//! Every cluster in a run is a bitset over the same taxon universe. The
//! [`TaxonContext`] fixes that universe once: it assigns each taxon name a
//! compact id and records which species each taxon (individual) belongs to.
//! The context is immutable after construction and passed explicitly to every
//! component that needs it.
//!
//! # Why ids follow sorted names
//! Ids are assigned in lexicographic order of the taxon names, independent
//! of the order in which trees list their leaves. Identical inputs therefore
//! always produce identical bit positions.

use crate::cluster::Cluster;
use crate::error::{QuartetError, Result};
use crate::tree::Tree;
use std::collections::{BTreeSet, HashMap};

/// Species → individuals assignment, as read from a mapping file.
///
/// # Format
/// One species per line, `species:ind1,ind2,...`. Blank lines and lines
/// starting with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct IndividualMapping {
    entries: Vec<(String, Vec<String>)>,
}

impl IndividualMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one species and its individuals.
    pub fn insert<S: Into<String>>(&mut self, species: S, individuals: Vec<String>) {
        self.entries.push((species.into(), individuals));
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// Parse the text of a mapping file.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::taxa::IndividualMapping;
    /// let mapping = IndividualMapping::parse("human:h1,h2\nchimp: c1\n").unwrap();
    /// assert_eq!(mapping.entries().len(), 2);
    /// assert_eq!(mapping.entries()[0].1, vec!["h1", "h2"]);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut mapping = IndividualMapping::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |message: &str| QuartetError::Input {
                what: "individual mapping",
                line: idx + 1,
                message: message.to_string(),
            };
            let (species, rest) = line.split_once(':').ok_or_else(|| bad("expected 'species:ind1,ind2'"))?;
            let species = species.trim();
            if species.is_empty() {
                return Err(bad("empty species name"));
            }
            let individuals: Vec<String> = rest
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if individuals.is_empty() {
                return Err(bad("species without individuals"));
            }
            mapping.insert(species, individuals);
        }
        Ok(mapping)
    }
}

/// Assignment of every taxon id to exactly one species id.
#[derive(Debug, Clone)]
pub struct SpeciesMap {
    names: Vec<String>,
    index: HashMap<String, usize>,
    of_taxon: Vec<usize>,
    individuals: Vec<Vec<usize>>,
}

impl SpeciesMap {
    pub fn species_count(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn species_of(&self, taxon: usize) -> usize {
        self.of_taxon[taxon]
    }

    pub fn species_name(&self, species: usize) -> &str {
        &self.names[species]
    }

    /// Taxon ids of the individuals of `species`, in increasing order.
    pub fn individuals(&self, species: usize) -> &[usize] {
        &self.individuals[species]
    }

    pub fn individuals_of_name(&self, species: &str) -> Option<&[usize]> {
        self.index.get(species).map(|&s| self.individuals[s].as_slice())
    }

    /// True when every species has exactly one individual.
    pub fn is_single_individual(&self) -> bool {
        self.individuals.iter().all(|inds| inds.len() == 1)
    }

    /// True when `cluster` is non-empty and all its taxa belong to one species.
    pub fn is_single_species(&self, cluster: &Cluster) -> bool {
        let mut ids = cluster.iter();
        let Some(first) = ids.next() else { return false };
        let species = self.of_taxon[first];
        ids.all(|id| self.of_taxon[id] == species)
    }

    /// Number of individuals of each species inside `cluster`.
    pub fn counts(&self, cluster: &Cluster) -> Vec<u64> {
        let mut counts = vec![0u64; self.names.len()];
        for id in cluster.iter() {
            counts[self.of_taxon[id]] += 1;
        }
        counts
    }
}

/// Taxon registry plus species map, shared read-only by one run.
#[derive(Debug, Clone)]
pub struct TaxonContext {
    names: Vec<String>,
    ids: HashMap<String, usize>,
    species: SpeciesMap,
}

impl TaxonContext {
    /// Build the context for a set of taxon names.
    ///
    /// Without a mapping, every taxon is its own species. With a mapping, the
    /// universe also includes mapped individuals that no gene tree contains,
    /// and every taxon must be assigned to a species.
    ///
    /// # Errors
    /// `UnmappedTaxon` for a taxon missing from the mapping, `DuplicateTaxon`
    /// for an individual listed under two species.
    pub fn new<I, S>(taxa: I, mapping: Option<&IndividualMapping>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut universe: BTreeSet<String> = taxa.into_iter().map(Into::into).collect();
        if let Some(mapping) = mapping {
            for (_, inds) in mapping.entries() {
                universe.extend(inds.iter().cloned());
            }
        }

        let names: Vec<String> = universe.into_iter().collect();
        let ids: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();

        let species = match mapping {
            None => SpeciesMap {
                names: names.clone(),
                index: ids.clone(),
                of_taxon: (0..names.len()).collect(),
                individuals: (0..names.len()).map(|id| vec![id]).collect(),
            },
            Some(mapping) => Self::species_from_mapping(&names, &ids, mapping)?,
        };

        Ok(TaxonContext { names, ids, species })
    }

    /// Build the context from the leaves of the gene trees.
    pub fn from_gene_trees(trees: &[Tree], mapping: Option<&IndividualMapping>) -> Result<Self> {
        let taxa = trees
            .iter()
            .flat_map(|t| t.leaf_names())
            .map(str::to_string);
        Self::new(taxa, mapping)
    }

    fn species_from_mapping(
        names: &[String],
        ids: &HashMap<String, usize>,
        mapping: &IndividualMapping,
    ) -> Result<SpeciesMap> {
        let mut entries: Vec<&(String, Vec<String>)> = mapping.entries().iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut of_taxon: Vec<Option<usize>> = vec![None; names.len()];
        let mut species_names = Vec::with_capacity(entries.len());
        let mut individuals = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());

        for (sp, (species, inds)) in entries.into_iter().enumerate() {
            if index.insert(species.clone(), sp).is_some() {
                return Err(QuartetError::DuplicateTaxon(species.clone()));
            }
            let mut members = Vec::with_capacity(inds.len());
            for ind in inds {
                let id = ids[ind];
                if of_taxon[id].replace(sp).is_some() {
                    return Err(QuartetError::DuplicateTaxon(ind.clone()));
                }
                members.push(id);
            }
            members.sort_unstable();
            species_names.push(species.clone());
            individuals.push(members);
        }

        let of_taxon = of_taxon
            .into_iter()
            .enumerate()
            .map(|(id, sp)| sp.ok_or_else(|| QuartetError::UnmappedTaxon(names[id].clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(SpeciesMap {
            names: species_names,
            index,
            of_taxon,
            individuals,
        })
    }

    /// Size of the taxon universe (bit width of every cluster).
    pub fn taxon_count(&self) -> usize {
        self.names.len()
    }

    pub fn taxon_id(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn taxon_name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn species(&self) -> &SpeciesMap {
        &self.species
    }

    pub fn empty_cluster(&self) -> Cluster {
        Cluster::empty(self.names.len())
    }

    /// Singleton cluster for a named leaf.
    ///
    /// # Errors
    /// `UnknownTaxon` when the name is not registered.
    pub fn leaf_cluster(&self, name: &str) -> Result<Cluster> {
        let id = self
            .taxon_id(name)
            .ok_or_else(|| QuartetError::UnknownTaxon(name.to_string()))?;
        Ok(Cluster::singleton(self.names.len(), id))
    }

    /// Species present in `cluster`, as `{S1,S2}` in species-id order.
    pub fn species_names_in(&self, cluster: &Cluster) -> String {
        let present: BTreeSet<usize> = cluster.iter().map(|id| self.species.species_of(id)).collect();
        let names: Vec<&str> = present
            .into_iter()
            .map(|sp| self.species.species_name(sp))
            .collect();
        format!("{{{}}}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_sorted_names() {
        let ctx = TaxonContext::new(["C", "A", "B", "A"], None).unwrap();
        assert_eq!(ctx.taxon_count(), 3);
        assert_eq!(ctx.taxon_id("A"), Some(0));
        assert_eq!(ctx.taxon_id("C"), Some(2));
        assert_eq!(ctx.taxon_name(1), "B");
        assert!(ctx.species().is_single_individual());
        assert!(matches!(ctx.leaf_cluster("Z"), Err(QuartetError::UnknownTaxon(_))));
    }

    #[test]
    fn test_mapping_groups_individuals() {
        let mapping = IndividualMapping::parse("X:x1,x2,x3\n# comment\nY:y1\n").unwrap();
        let ctx = TaxonContext::new(["x1", "x2", "y1"], Some(&mapping)).unwrap();
        // x3 appears only in the mapping but still joins the universe
        assert_eq!(ctx.taxon_count(), 4);
        let species = ctx.species();
        assert!(!species.is_single_individual());
        assert_eq!(species.individuals_of_name("X").unwrap().len(), 3);

        let mut xs = ctx.empty_cluster();
        xs.add_leaf(ctx.taxon_id("x1").unwrap());
        xs.add_leaf(ctx.taxon_id("x3").unwrap());
        assert!(species.is_single_species(&xs));
        assert_eq!(species.counts(&xs), vec![2, 0]);

        xs.add_leaf(ctx.taxon_id("y1").unwrap());
        assert!(!species.is_single_species(&xs));
        assert_eq!(ctx.species_names_in(&xs), "{X,Y}");
        assert!(!species.is_single_species(&ctx.empty_cluster()));
    }

    #[test]
    fn test_unmapped_and_duplicate_taxa_are_fatal() {
        let mapping = IndividualMapping::parse("X:x1\n").unwrap();
        assert!(matches!(
            TaxonContext::new(["x1", "z"], Some(&mapping)),
            Err(QuartetError::UnmappedTaxon(name)) if name == "z"
        ));

        let twice = IndividualMapping::parse("X:x1\nY:x1\n").unwrap();
        assert!(matches!(
            TaxonContext::new(["x1"], Some(&twice)),
            Err(QuartetError::DuplicateTaxon(_))
        ));
    }

    #[test]
    fn test_malformed_mapping_line() {
        let err = IndividualMapping::parse("X:x1\nnot a mapping\n").unwrap_err();
        assert!(matches!(err, QuartetError::Input { line: 2, .. }));
    }
}
