use crate::sql::DbParameter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl ComparisonOp {
    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Le => "<=",
        }
    }

    /// Operator with operands swapped: `5 lt x` is `x gt 5`.
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Ge => ComparisonOp::Le,
            ComparisonOp::Le => ComparisonOp::Ge,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn sql(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

/// Compiled boolean expression. Columns are catalog names; values are bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum PredicateNode {
    Comparison {
        column: String,
        op: ComparisonOp,
        param: DbParameter,
    },
    Logical {
        op: LogicalOp,
        children: Vec<PredicateNode>,
    },
    Not(Box<PredicateNode>),
}

impl PredicateNode {
    pub fn compare(column: impl Into<String>, op: ComparisonOp, param: DbParameter) -> Self {
        PredicateNode::Comparison {
            column: column.into(),
            op,
            param,
        }
    }

    /// AND of the given nodes; a single node is returned as is.
    pub fn all(mut children: Vec<PredicateNode>) -> Option<PredicateNode> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(PredicateNode::Logical {
                op: LogicalOp::And,
                children,
            }),
        }
    }

    /// Attach the policy row filter as the outermost conjunct. The caller's
    /// predicate stays a separate, parenthesized operand and is never merged
    /// into the policy's tree.
    pub fn with_row_filter(caller: Option<PredicateNode>, row_filter: Option<PredicateNode>) -> Option<PredicateNode> {
        match (caller, row_filter) {
            (Some(c), Some(p)) => Some(PredicateNode::Logical {
                op: LogicalOp::And,
                children: vec![c, p],
            }),
            (c, p) => c.or(p),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PredicateNode::Comparison { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column.as_str());
                }
            }
            PredicateNode::Logical { children, .. } => {
                for c in children {
                    c.collect_columns(out);
                }
            }
            PredicateNode::Not(inner) => inner.collect_columns(out),
        }
    }
}
