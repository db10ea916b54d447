use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::error::{QuartetError, Result};
use crate::taxa::IndividualMapping;
use crate::tree::Tree;

/// File name of the per-branch quadripartition table.
pub const FREQ_TABLE_FILE: &str = "freqQuad.csv";
/// File name of the plotting script written next to the table.
pub const FREQ_SCRIPT_FILE: &str = "freqQuadVisualization.R";

const FREQ_SCRIPT: &str = "#!/usr/bin/env Rscript
red='#d53e4f';orange='#1d91c0';blue='#41b6c4';colormap = c(red,orange,blue)
require(reshape2);require(ggplot2);
dirPath = '.'; filePath = paste(dirPath,'/freqQuadCorrected.csv',sep=''); md<-read.csv(filePath,header=F,sep='\\t'); md$value = md$V5/md$V6;
a<-length(levels(as.factor(md$V7)))*3.7; b<-4; sizes <- c(a,b);
md$V8<-reorder(md$V8,-md$value)
ggplot(data=md)+aes(x=V8,y=value,fill=V9)+geom_bar(stat='identity',color=1,width=0.8,position='dodge')+theme_bw()+theme(axis.text.x=element_text(angle=90))+scale_fill_manual(values=colormap,name='Topology')+geom_hline(yintercept=1/3,size=0.4,linetype=2)+ylab('relative freq.')+facet_wrap(~V7,scales='free_x')+xlab('')
pdfFile = paste(dirPath,'/relativeFreq.pdf',sep=''); ggsave(pdfFile,width = sizes[1], height= sizes[2]);
";

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Remove bracketed comments (`[...]`, including BEAST `[&rate=...]`
/// annotations) from a Newick string.
fn strip_comments(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut depth = 0usize;
    for ch in newick.chars() {
        match ch {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => result.push(ch),
            _ => {}
        }
    }
    result
}

/// Read a whole text file; paths ending in `.gz` are decompressed.
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let p = path.as_ref();
    if is_gz(p) {
        let mut text = String::new();
        GzDecoder::new(File::open(p)?).read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(fs::read_to_string(p)?)
    }
}

/// Parse one Newick tree per non-empty line.
///
/// # Errors
/// `Input` naming `what` and the 1-based line of the first tree that fails
/// to parse.
pub fn parse_newick_lines(text: &str, what: &'static str) -> Result<Vec<Tree>> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx, strip_comments(line)))
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            Tree::from_newick(&line).map_err(|e| QuartetError::Input {
                what,
                line: idx + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Read gene trees from a file with one Newick tree per line.
pub fn read_gene_trees<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>> {
    let trees = parse_newick_lines(&read_text(&path)?, "gene trees")?;
    info!("Read {} gene trees from {}", trees.len(), path.as_ref().display());
    Ok(trees)
}

/// Read the first tree of a species-tree file.
pub fn read_species_tree<P: AsRef<Path>>(path: P) -> Result<Tree> {
    parse_newick_lines(&read_text(&path)?, "species tree")?
        .into_iter()
        .next()
        .ok_or(QuartetError::EmptyTree)
}

/// Read an individual mapping file (`species:ind1,ind2` per line).
pub fn read_individual_mapping<P: AsRef<Path>>(path: P) -> Result<IndividualMapping> {
    IndividualMapping::parse(&read_text(path)?)
}

/// Open a buffered writer; paths ending in `.gz` are gzip-compressed.
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<Box<dyn Write>> {
    let p = path.as_ref();
    let file = File::create(p)?;
    let out: Box<dyn Write> = if is_gz(p) {
        Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
    } else {
        Box::new(BufWriter::new(file))
    };
    Ok(out)
}

/// Write a tree as a single Newick line.
pub fn write_tree<W: Write + ?Sized>(out: &mut W, tree: &Tree) -> Result<()> {
    writeln!(out, "{}", tree.to_newick())?;
    out.flush()?;
    Ok(())
}

/// Tab-separated table of the three quadripartitions of every scored
/// branch, plus the R script that plots it.
///
/// Both files are created up front so that an unwritable directory fails
/// before any branch is scored.
pub struct FrequencyTableWriter {
    table: Box<dyn Write>,
    script: Box<dyn Write>,
}

impl FrequencyTableWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(FrequencyTableWriter {
            script: create_output(dir.join(FREQ_SCRIPT_FILE))?,
            table: create_output(dir.join(FREQ_TABLE_FILE))?,
        })
    }

    /// One row: `branch, t<topology>, quadripartition, statistic, frequency, effectiveN`.
    pub fn write_row(
        &mut self,
        branch: &str,
        topology: usize,
        quadripartition: &str,
        statistic: f64,
        frequency: f64,
        effective_n: f64,
    ) -> Result<()> {
        writeln!(
            self.table,
            "{branch}\tt{topology}\t{quadripartition}\t{statistic:?}\t{frequency:?}\t{effective_n:?}"
        )?;
        Ok(())
    }

    /// Write the plotting script and flush both files.
    pub fn finish(mut self) -> Result<()> {
        self.script.write_all(FREQ_SCRIPT.as_bytes())?;
        self.script.flush()?;
        self.table.flush()?;
        Ok(())
    }
}
