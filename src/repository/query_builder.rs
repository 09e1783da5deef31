// ==========================================
// 营销活动事件调度 - SQL 查询构建工具
// ==========================================
// 职责: 以可组合谓词替代字符串拼接的动态 WHERE
// 约束: 所有值一律走参数绑定 (?)，列名/表名只允许代码内常量
// ==========================================

use rusqlite::types::Value;

/// 单个 SQL 谓词（片段 + 绑定参数）
///
/// 多个谓词在 [`SqlQueryBuilder`] 中以 AND 组合；
/// 需要 OR 时用 [`Predicate::any_of`] 先组合成一个谓词。
///
/// # 示例
/// ```
/// use campaign_event_scheduler::repository::query_builder::Predicate;
///
/// let p = Predicate::eq("o.event_id", 7_i64);
/// assert_eq!(p.sql(), "o.event_id = ?");
/// assert_eq!(p.params().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    sql: String,
    params: Vec<Value>,
}

impl Predicate {
    /// 原始片段（占位符个数必须与 params 一致）
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::raw(format!("{} = ?", column), vec![value.into()])
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::raw(format!("{} != ?", column), vec![value.into()])
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self::raw(format!("{} <= ?", column), vec![value.into()])
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::raw(format!("{} >= ?", column), vec![value.into()])
    }

    pub fn between(column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::raw(
            format!("{} BETWEEN ? AND ?", column),
            vec![low.into(), high.into()],
        )
    }

    pub fn is_null(column: &str) -> Self {
        Self::raw(format!("{} IS NULL", column), Vec::new())
    }

    /// IN 列表；空列表恒假
    pub fn in_list<T>(column: &str, values: &[T]) -> Self
    where
        T: Clone + Into<Value>,
    {
        if values.is_empty() {
            return Self::raw("0 = 1", Vec::new());
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        Self::raw(
            format!("{} IN ({})", column, placeholders),
            values.iter().cloned().map(Into::into).collect(),
        )
    }

    /// NOT IN 列表；空列表恒真
    pub fn not_in_list<T>(column: &str, values: &[T]) -> Self
    where
        T: Clone + Into<Value>,
    {
        if values.is_empty() {
            return Self::raw("1 = 1", Vec::new());
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        Self::raw(
            format!("{} NOT IN ({})", column, placeholders),
            values.iter().cloned().map(Into::into).collect(),
        )
    }

    /// 多列模糊匹配（任一列包含 needle）
    pub fn contains_any(columns: &[&str], needle: &str) -> Self {
        let pattern = format!("%{}%", needle);
        Self::any_of(
            columns
                .iter()
                .map(|c| Self::raw(format!("{} LIKE ?", c), vec![Value::Text(pattern.clone())]))
                .collect(),
        )
    }

    /// OR 组合；空集合恒假
    pub fn any_of(predicates: Vec<Predicate>) -> Self {
        Self::combine(predicates, " OR ", "0 = 1")
    }

    /// AND 组合；空集合恒真
    pub fn all_of(predicates: Vec<Predicate>) -> Self {
        Self::combine(predicates, " AND ", "1 = 1")
    }

    /// NOT EXISTS 子查询
    pub fn not_exists(subquery: Predicate) -> Self {
        Self::raw(format!("NOT EXISTS ({})", subquery.sql), subquery.params)
    }

    fn combine(predicates: Vec<Predicate>, sep: &str, empty: &str) -> Self {
        if predicates.is_empty() {
            return Self::raw(empty, Vec::new());
        }
        let mut parts = Vec::with_capacity(predicates.len());
        let mut params = Vec::new();
        for p in predicates {
            parts.push(format!("({})", p.sql));
            params.extend(p.params);
        }
        Self::raw(parts.join(sep), params)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// SQL 查询构建器（流式 API）
///
/// # 示例
/// ```
/// use campaign_event_scheduler::repository::query_builder::{Predicate, SqlQueryBuilder};
///
/// let (sql, params) = SqlQueryBuilder::new("SELECT o.id FROM campaign_event_log o")
///     .where_clause(Predicate::eq("o.event_id", 3_i64))
///     .and_if(Some(Predicate::eq("o.contact_id", 9_i64)))
///     .order_by("o.id ASC")
///     .limit(10)
///     .build();
///
/// assert_eq!(
///     sql,
///     "SELECT o.id FROM campaign_event_log o WHERE (o.event_id = ?) AND (o.contact_id = ?) ORDER BY o.id ASC LIMIT 10"
/// );
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SqlQueryBuilder {
    select_clause: String,
    joins: Vec<Predicate>,
    predicates: Vec<Predicate>,
    group_by_clause: Option<String>,
    order_by_clause: Option<String>,
    limit_clause: Option<usize>,
    offset_clause: Option<usize>,
}

impl SqlQueryBuilder {
    /// 创建新的 SQL 查询构建器（select 含 FROM）
    pub fn new(select: &str) -> Self {
        Self {
            select_clause: select.to_string(),
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by_clause: None,
            order_by_clause: None,
            limit_clause: None,
            offset_clause: None,
        }
    }

    /// 添加 JOIN 子句（完整写法，如 "INNER JOIN campaigns c ON c.id = o.campaign_id"）
    pub fn join(self, clause: &str) -> Self {
        self.join_with(Predicate::raw(clause, Vec::new()))
    }

    /// 添加带绑定参数的 JOIN 子句
    pub fn join_with(mut self, clause: Predicate) -> Self {
        self.joins.push(clause);
        self
    }

    /// 添加 WHERE 条件（AND）
    pub fn where_clause(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// 条件添加 AND 子句
    pub fn and_if(mut self, predicate: Option<Predicate>) -> Self {
        if let Some(p) = predicate {
            self.predicates.push(p);
        }
        self
    }

    /// 批量添加 AND 子句
    pub fn and_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn group_by(mut self, group: &str) -> Self {
        self.group_by_clause = Some(group.to_string());
        self
    }

    pub fn order_by(mut self, order: &str) -> Self {
        self.order_by_clause = Some(order.to_string());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit_clause = Some(n);
        self
    }

    /// None 表示不限制
    pub fn limit_opt(mut self, n: Option<usize>) -> Self {
        self.limit_clause = n;
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset_clause = Some(n);
        self
    }

    /// 构建最终的 SQL 语句与按占位符顺序排列的参数
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = self.select_clause.clone();
        let mut params = Vec::new();

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.sql);
            params.extend(join.params.iter().cloned());
        }

        // 多个谓词时逐个加括号: OR 组合谓词不能被相邻的 AND 拆开
        if !self.predicates.is_empty() {
            let parts: Vec<String> = if self.predicates.len() == 1 {
                vec![self.predicates[0].sql.clone()]
            } else {
                self.predicates
                    .iter()
                    .map(|p| format!("({})", p.sql))
                    .collect()
            };
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
            for p in &self.predicates {
                params.extend(p.params.iter().cloned());
            }
        }

        if let Some(group) = &self.group_by_clause {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }

        if let Some(order) = &self.order_by_clause {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }

        // SQLite 的 OFFSET 必须跟在 LIMIT 之后；只有 offset 时用 LIMIT -1
        match (self.limit_clause, self.offset_clause) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        (sql, params)
    }
}

// ==========================================
// 单元测试
// ==========================================
